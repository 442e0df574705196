//! Cognito Identity exchange over the JSON 1.1 protocol
//!
//! Two calls: `GetId` resolves the identity id for the pool (cached after the
//! first success) and `GetCredentialsForIdentity` issues the transient keys.

use super::{CredentialError, Credentials, IdentityExchange, IdentityProof};
use crate::config::IdentitySection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

const AMZ_JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const TARGET_PREFIX: &str = "AWSCognitoIdentityService";

/// Connection settings for the identity service
#[derive(Debug, Clone)]
pub struct CognitoConfig {
    pub region: String,
    pub identity_pool_id: String,
    pub user_pool_id: String,
    /// Override for the service endpoint; defaults to the regional endpoint
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl CognitoConfig {
    pub fn from_sections(region: &str, identity: &IdentitySection) -> Self {
        Self {
            region: region.to_string(),
            identity_pool_id: identity.identity_pool_id.clone(),
            user_pool_id: identity.user_pool_id.clone(),
            endpoint: identity.endpoint.clone(),
            timeout: Duration::from_secs(identity.request_timeout_secs),
        }
    }

    fn endpoint_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://cognito-identity.{}.amazonaws.com/", self.region))
    }

    /// Key of the `Logins` map that identifies the user pool as provider
    pub fn login_provider(&self) -> String {
        format!(
            "cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        )
    }
}

/// [`IdentityExchange`] backed by Amazon Cognito Identity
pub struct CognitoIdentityExchange {
    config: CognitoConfig,
    client: Client,
    /// Identity id resolved for one id token
    resolved: Mutex<Option<ResolvedIdentity>>,
}

struct ResolvedIdentity {
    id_token: String,
    identity_id: String,
}

impl CognitoIdentityExchange {
    pub fn new(config: CognitoConfig) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CredentialError::Exchange(e.to_string()))?;

        Ok(Self {
            config,
            client,
            resolved: Mutex::new(None),
        })
    }

    /// Identity id resolved by a previous `GetId` call
    pub fn identity_id(&self) -> Option<String> {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|r| r.identity_id.clone())
    }

    fn cached_identity_id(&self, proof: &IdentityProof) -> Option<String> {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|r| r.id_token == proof.id_token)
            .map(|r| r.identity_id.clone())
    }

    fn logins(&self, proof: &IdentityProof) -> HashMap<String, String> {
        HashMap::from([(self.config.login_provider(), proof.id_token.clone())])
    }

    async fn call<Req, Resp>(&self, operation: &str, body: &Req) -> Result<Resp, CredentialError>
    where
        Req: Serialize + ?Sized,
        Resp: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(self.config.endpoint_url())
            .header("Content-Type", AMZ_JSON_CONTENT_TYPE)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .json(body)
            .send()
            .await
            .map_err(|e| CredentialError::Exchange(format!("{operation}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_service_error(operation, status.as_u16(), &error_text));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| CredentialError::Exchange(format!("{operation}: invalid response: {e}")))
    }

    async fn resolve_identity_id(&self, proof: &IdentityProof) -> Result<String, CredentialError> {
        if let Some(id) = self.cached_identity_id(proof) {
            return Ok(id);
        }

        let request = GetIdRequest {
            identity_pool_id: &self.config.identity_pool_id,
            logins: self.logins(proof),
        };
        let response: GetIdResponse = self.call("GetId", &request).await?;
        let identity_id = response
            .identity_id
            .ok_or_else(|| CredentialError::Exchange("GetId: no IdentityId returned".into()))?;

        debug!(identity_id = %identity_id, "Resolved identity id");
        *self.resolved.lock().unwrap_or_else(|e| e.into_inner()) = Some(ResolvedIdentity {
            id_token: proof.id_token.clone(),
            identity_id: identity_id.clone(),
        });
        Ok(identity_id)
    }
}

#[async_trait]
impl IdentityExchange for CognitoIdentityExchange {
    async fn exchange(&self, proof: &IdentityProof) -> Result<Credentials, CredentialError> {
        let identity_id = self.resolve_identity_id(proof).await?;

        let request = GetCredentialsRequest {
            identity_id: &identity_id,
            logins: self.logins(proof),
        };
        let response: GetCredentialsResponse = self
            .call("GetCredentialsForIdentity", &request)
            .await
            .map_err(|e| {
                // A rejected identity id is not worth reusing.
                if e.requires_reauthentication() {
                    self.forget_identity();
                }
                e
            })?;

        let issued = response
            .credentials
            .ok_or(CredentialError::MissingCredentials)?;

        let expires_at = DateTime::<Utc>::from_timestamp(issued.expiration as i64, 0)
            .ok_or_else(|| {
                CredentialError::Exchange(format!("invalid expiration {}", issued.expiration))
            })?;

        info!(
            identity_id = %identity_id,
            expires_at = %expires_at,
            "Identity exchange succeeded"
        );

        Ok(Credentials {
            access_key_id: issued.access_key_id,
            secret_access_key: issued.secret_key,
            session_token: issued.session_token,
            expires_at,
            identity_id: response.identity_id.or(Some(identity_id)),
        })
    }

    fn forget_identity(&self) {
        *self.resolved.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

fn classify_service_error(operation: &str, status: u16, body: &str) -> CredentialError {
    let parsed: Option<ServiceError> = serde_json::from_str(body).ok();
    let (kind, message) = match parsed {
        Some(err) => (
            err.kind.unwrap_or_default(),
            err.message.unwrap_or_default(),
        ),
        None => (String::new(), body.to_string()),
    };

    // Error types may arrive namespaced, e.g. "com.amazonaws...#NotAuthorizedException".
    let short_kind = kind.rsplit('#').next().unwrap_or(&kind);
    match short_kind {
        "NotAuthorizedException" | "ResourceNotFoundException" => {
            CredentialError::IdentityRejected(format!("{short_kind}: {message}"))
        }
        _ => CredentialError::Exchange(format!("{operation} returned {status}: {short_kind} {message}")),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdRequest<'a> {
    identity_pool_id: &'a str,
    logins: HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetIdResponse {
    identity_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetCredentialsRequest<'a> {
    identity_id: &'a str,
    logins: HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCredentialsResponse {
    identity_id: Option<String>,
    credentials: Option<IssuedCredentials>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IssuedCredentials {
    access_key_id: String,
    secret_key: String,
    session_token: Option<String>,
    /// Epoch seconds, fractional
    expiration: f64,
}

#[derive(Deserialize)]
struct ServiceError {
    #[serde(rename = "__type")]
    kind: Option<String>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CognitoConfig {
        CognitoConfig {
            region: "us-east-1".to_string(),
            identity_pool_id: "us-east-1:pool".to_string(),
            user_pool_id: "us-east-1_ABC123".to_string(),
            endpoint: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_regional_endpoint_and_login_provider() {
        let config = config();
        assert_eq!(
            config.endpoint_url(),
            "https://cognito-identity.us-east-1.amazonaws.com/"
        );
        assert_eq!(
            config.login_provider(),
            "cognito-idp.us-east-1.amazonaws.com/us-east-1_ABC123"
        );
    }

    #[test]
    fn test_not_authorized_maps_to_identity_rejected() {
        let body = r#"{"__type":"NotAuthorizedException","message":"Token is expired"}"#;
        let err = classify_service_error("GetId", 400, body);
        assert!(matches!(err, CredentialError::IdentityRejected(ref m) if m.contains("Token is expired")));

        let namespaced =
            r#"{"__type":"com.amazonaws.cognito#NotAuthorizedException","message":"nope"}"#;
        assert!(classify_service_error("GetId", 400, namespaced).requires_reauthentication());
    }

    #[test]
    fn test_throttling_is_retryable_exchange_error() {
        let body = r#"{"__type":"TooManyRequestsException","message":"slow down"}"#;
        let err = classify_service_error("GetCredentialsForIdentity", 429, body);
        assert!(matches!(err, CredentialError::Exchange(ref m) if m.contains("429")));
        assert!(!err.requires_reauthentication());
    }

    #[test]
    fn test_unparseable_error_body() {
        let err = classify_service_error("GetId", 500, "<html>bad gateway</html>");
        assert!(matches!(err, CredentialError::Exchange(ref m) if m.contains("bad gateway")));
    }

    #[test]
    fn test_request_serialization_uses_pascal_case() {
        let request = GetIdRequest {
            identity_pool_id: "pool",
            logins: HashMap::from([("provider".to_string(), "token".to_string())]),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["IdentityPoolId"], "pool");
        assert_eq!(json["Logins"]["provider"], "token");
    }
}
