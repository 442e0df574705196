//! Credential Broker: caches transient credentials and refreshes them on demand

use super::{CredentialError, Credentials, IdentityExchange, IdentityProof};
use crate::clock::Clock;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the current credentials for one authenticated identity
///
/// Retries are not performed here; the orchestrator decides whether and when
/// to call [`CredentialBroker::obtain`] again.
pub struct CredentialBroker {
    exchange: Arc<dyn IdentityExchange>,
    clock: Arc<dyn Clock>,
    proof: Option<IdentityProof>,
    skew: Duration,
    cached: Option<Arc<Credentials>>,
}

impl CredentialBroker {
    pub fn new(
        exchange: Arc<dyn IdentityExchange>,
        clock: Arc<dyn Clock>,
        proof: Option<IdentityProof>,
        skew: Duration,
    ) -> Self {
        Self {
            exchange,
            clock,
            proof,
            skew,
            cached: None,
        }
    }

    /// Return cached credentials while `now < expires_at - skew`, otherwise exchange
    pub async fn obtain(&mut self) -> Result<Arc<Credentials>, CredentialError> {
        if let Some(cached) = &self.cached {
            if cached.is_fresh(self.clock.now(), self.skew) {
                debug!(
                    access_key_id = %cached.access_key_id,
                    expires_at = %cached.expires_at,
                    "Reusing cached credentials"
                );
                return Ok(cached.clone());
            }
            debug!(expires_at = %cached.expires_at, "Cached credentials inside refresh skew");
        }

        self.refresh().await
    }

    /// Drop the cache and exchange unconditionally
    pub async fn force_refresh(&mut self) -> Result<Arc<Credentials>, CredentialError> {
        info!("Forcing credential refresh");
        self.cached = None;
        self.refresh().await
    }

    async fn refresh(&mut self) -> Result<Arc<Credentials>, CredentialError> {
        let proof = self.proof.as_ref().ok_or(CredentialError::Unauthenticated)?;

        let issued = self.exchange.exchange(proof).await.map_err(|e| {
            warn!("Credential exchange failed: {}", e);
            e
        })?;

        if issued.access_key_id.is_empty() || issued.secret_access_key.is_empty() {
            return Err(CredentialError::MissingCredentials);
        }

        let now = self.clock.now();
        if issued.is_expired(now) {
            return Err(CredentialError::Expired {
                expired_at: issued.expires_at,
            });
        }

        info!(
            access_key_id = %issued.access_key_id,
            expires_at = %issued.expires_at,
            has_session_token = issued.session_token.is_some(),
            "Obtained new credentials"
        );

        let issued = Arc::new(issued);
        self.cached = Some(issued.clone());
        Ok(issued)
    }

    /// Currently cached credentials, if any
    pub fn cached(&self) -> Option<Arc<Credentials>> {
        self.cached.clone()
    }

    /// Replace the identity proof (after re-authentication) and drop the cache
    pub fn set_identity(&mut self, proof: IdentityProof) {
        self.exchange.forget_identity();
        self.proof = Some(proof);
        self.cached = None;
    }

    /// Forget the identity and any cached credentials (sign-out)
    pub fn clear(&mut self) {
        self.exchange.forget_identity();
        self.proof = None;
        self.cached = None;
    }

    pub fn has_identity(&self) -> bool {
        self.proof.is_some()
    }
}
