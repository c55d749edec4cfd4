//! Package-level constants and protocol defaults.

/// Current version of livehub (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "livehub";

/// Seconds between server-initiated ping frames.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Seconds a connection may stay silent before its read deadline elapses.
pub const DEFAULT_PONG_WAIT_SECS: u64 = 60;

/// Upper bound, in seconds, on a single outbound write.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;
