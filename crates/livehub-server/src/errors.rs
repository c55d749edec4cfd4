//! Server error types.

use livehub_core::ConnectionId;
use thiserror::Error;

/// Errors that stop the server from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Accepting or serving connections failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Registry mutations that were refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A live connection already holds this handle.
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_handle() {
        let err = RegistryError::Duplicate(ConnectionId::from("c1"));
        assert_eq!(err.to_string(), "connection c1 is already registered");
    }

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:80: denied");
    }
}
