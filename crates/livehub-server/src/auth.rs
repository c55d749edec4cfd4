//! Upgrade-time authentication.
//!
//! The upgrade handler hands the presented credentials to an
//! [`Authenticator`] before the protocol switch. A rejection becomes a
//! `401 Unauthorized` response and no connection is registered.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use livehub_settings::AuthSettings;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// What a client presented at upgrade time.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    /// Bearer token from the `token` query parameter or `Authorization` header.
    pub token: Option<String>,
    /// Peer address, when known.
    pub remote_addr: Option<SocketAddr>,
}

impl Credentials {
    /// Credentials carrying only a token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            remote_addr: None,
        }
    }
}

/// The identity attached to an admitted connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    /// No token was presented and anonymous access is allowed.
    Anonymous,
    /// A token mapped to this subject.
    Subject(String),
}

impl Principal {
    /// The authenticated subject, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Subject(s) => Some(s),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("anonymous"),
            Self::Subject(s) => f.write_str(s),
        }
    }
}

/// Why an upgrade was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No token and anonymous access is disabled.
    #[error("missing bearer token")]
    MissingToken,
    /// A token was presented but is not recognised.
    #[error("invalid bearer token")]
    InvalidToken,
}

/// Approves or rejects a connection before upgrade.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate `credentials`, returning the principal to record on the
    /// connection.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError>;
}

/// Admits every client as [`Principal::Anonymous`], or as the token itself
/// when one is presented.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        Ok(credentials
            .token
            .as_ref()
            .map_or(Principal::Anonymous, |t| Principal::Subject(t.clone())))
    }
}

type TokenDigest = [u8; 32];

fn digest(token: &str) -> TokenDigest {
    let mut out = [0_u8; 32];
    out.copy_from_slice(&Sha256::digest(token.as_bytes()));
    out
}

/// Validates bearer tokens against a fixed set.
///
/// Only SHA-256 digests of the configured tokens are kept in memory.
pub struct StaticTokenAuthenticator {
    subjects: HashMap<TokenDigest, String>,
    allow_anonymous: bool,
}

impl StaticTokenAuthenticator {
    /// Build from `(subject, token)` pairs.
    pub fn new<I, S, T>(tokens: I, allow_anonymous: bool) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: AsRef<str>,
    {
        let subjects = tokens
            .into_iter()
            .map(|(subject, token)| (digest(token.as_ref()), subject.into()))
            .collect();
        Self {
            subjects,
            allow_anonymous,
        }
    }

    /// Build from the `auth` settings section.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(
            settings
                .tokens
                .iter()
                .map(|entry| (entry.subject.clone(), entry.token.as_str())),
            settings.allow_anonymous,
        )
    }

    /// Number of configured tokens.
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Whether no tokens are configured.
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

impl fmt::Debug for StaticTokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenAuthenticator")
            .field("tokens", &self.subjects.len())
            .field("allow_anonymous", &self.allow_anonymous)
            .finish()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        match credentials.token.as_deref().filter(|t| !t.is_empty()) {
            None if self.allow_anonymous => Ok(Principal::Anonymous),
            None => Err(AuthError::MissingToken),
            Some(token) => self
                .subjects
                .get(&digest(token))
                .map(|subject| Principal::Subject(subject.clone()))
                .ok_or(AuthError::InvalidToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livehub_settings::TokenEntry;

    fn authenticator(allow_anonymous: bool) -> StaticTokenAuthenticator {
        StaticTokenAuthenticator::new([("ops", "s3cret"), ("grafana", "g-token")], allow_anonymous)
    }

    #[tokio::test]
    async fn known_token_maps_to_subject() {
        let auth = authenticator(false);
        let principal = auth
            .authenticate(&Credentials::bearer("g-token"))
            .await
            .unwrap();
        assert_eq!(principal, Principal::Subject("grafana".into()));
        assert_eq!(principal.subject(), Some("grafana"));
    }

    #[tokio::test]
    async fn unknown_token_rejected_even_with_anonymous() {
        let auth = authenticator(true);
        let err = auth
            .authenticate(&Credentials::bearer("mock-token"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken);
    }

    #[tokio::test]
    async fn missing_token_depends_on_anonymous_flag() {
        let open = authenticator(true);
        assert_eq!(
            open.authenticate(&Credentials::default()).await.unwrap(),
            Principal::Anonymous
        );

        let closed = authenticator(false);
        assert_eq!(
            closed.authenticate(&Credentials::default()).await.unwrap_err(),
            AuthError::MissingToken
        );
    }

    #[tokio::test]
    async fn empty_token_treated_as_missing() {
        let auth = authenticator(false);
        let err = auth.authenticate(&Credentials::bearer("")).await.unwrap_err();
        assert_eq!(err, AuthError::MissingToken);
    }

    #[tokio::test]
    async fn from_settings_uses_token_entries() {
        let settings = AuthSettings {
            allow_anonymous: false,
            tokens: vec![TokenEntry {
                subject: "dash".into(),
                token: "abc".into(),
            }],
        };
        let auth = StaticTokenAuthenticator::from_settings(&settings);
        assert_eq!(auth.len(), 1);
        let principal = auth.authenticate(&Credentials::bearer("abc")).await.unwrap();
        assert_eq!(principal.to_string(), "dash");
    }

    #[test]
    fn debug_does_not_leak_tokens() {
        let auth = authenticator(false);
        let debug = format!("{auth:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("tokens: 2"));
    }

    #[tokio::test]
    async fn allow_all_admits_everyone() {
        assert_eq!(
            AllowAll.authenticate(&Credentials::default()).await.unwrap(),
            Principal::Anonymous
        );
        assert_eq!(
            AllowAll
                .authenticate(&Credentials::bearer("anything"))
                .await
                .unwrap()
                .to_string(),
            "anything"
        );
    }
}
