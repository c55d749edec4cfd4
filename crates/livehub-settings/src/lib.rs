//! # livehub-settings
//!
//! Layered configuration for the livehub broadcast hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **Settings file**: `~/.livehub/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `LIVEHUB_*` overrides (highest priority)
//!
//! The merged result is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides, deep_merge, load_settings, load_settings_from_path, load_settings_with,
    settings_path,
};
pub use types::*;
