//! Transient credentials and the identity exchange that issues them
//!
//! - [`Credentials`] are immutable once issued and superseded on refresh
//! - [`IdentityExchange`] is the seam to the external credential provider
//! - [`broker::CredentialBroker`] caches and refreshes them for the orchestrator

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub mod broker;
pub mod cognito;

pub use broker::CredentialBroker;
pub use cognito::CognitoIdentityExchange;

/// Temporary access credentials tied to an authenticated identity
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Identity the credentials were issued for, when the provider reports one
    pub identity_id: Option<String>,
}

impl Credentials {
    /// True once `now` has reached the expiry instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True while `now` is before `expires_at - skew`
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now < self.expires_at - skew
    }
}

// Secret material must never reach logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "***"),
            )
            .field("expires_at", &self.expires_at)
            .field("identity_id", &self.identity_id)
            .finish()
    }
}

/// Proof of an authenticated identity, produced by the sign-in flow
#[derive(Clone)]
pub struct IdentityProof {
    /// Identity token issued by the user pool
    pub id_token: String,
}

impl IdentityProof {
    pub fn new(id_token: impl Into<String>) -> Self {
        Self {
            id_token: id_token.into(),
        }
    }
}

impl std::fmt::Debug for IdentityProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProof")
            .field("id_token", &"***")
            .finish()
    }
}

/// Credential acquisition failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CredentialError {
    #[error("Credential exchange failed: {0}")]
    Exchange(String),
    #[error("Identity proof rejected: {0}")]
    IdentityRejected(String),
    #[error("Credential exchange returned no credentials")]
    MissingCredentials,
    #[error("Credentials expired at {expired_at} and could not be refreshed")]
    Expired { expired_at: DateTime<Utc> },
    #[error("No identity proof available - sign in required")]
    Unauthenticated,
}

impl CredentialError {
    /// Whether the operator must re-authenticate before another attempt can succeed
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            CredentialError::IdentityRejected(_) | CredentialError::Unauthenticated
        )
    }
}

/// External identity-exchange call: proven identity in, transient credentials out
#[async_trait]
pub trait IdentityExchange: Send + Sync {
    async fn exchange(&self, proof: &IdentityProof) -> Result<Credentials, CredentialError>;

    /// Drop anything remembered about the previous identity
    fn forget_identity(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credentials(expires_at: DateTime<Utc>) -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "super-secret".to_string(),
            session_token: Some("session-token-value".to_string()),
            expires_at,
            identity_id: None,
        }
    }

    #[test]
    fn test_freshness_respects_skew() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let creds = credentials(now + Duration::seconds(120));

        assert!(creds.is_fresh(now, Duration::seconds(60)));
        assert!(!creds.is_fresh(now + Duration::seconds(60), Duration::seconds(60)));
        assert!(!creds.is_expired(now + Duration::seconds(119)));
        assert!(creds.is_expired(now + Duration::seconds(120)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let now = Utc::now();
        let rendered = format!("{:?}", credentials(now));
        assert!(rendered.contains("AKIDEXAMPLE"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("session-token-value"));

        let proof = IdentityProof::new("eyJraWQ.secret.token");
        assert!(!format!("{proof:?}").contains("eyJraWQ"));
    }

    #[test]
    fn test_reauthentication_classification() {
        assert!(CredentialError::IdentityRejected("expired".into()).requires_reauthentication());
        assert!(CredentialError::Unauthenticated.requires_reauthentication());
        assert!(!CredentialError::Exchange("timeout".into()).requires_reauthentication());
        assert!(!CredentialError::MissingCredentials.requires_reauthentication());
    }
}
