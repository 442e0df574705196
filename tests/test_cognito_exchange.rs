//! Identity exchange against a mock identity service

use amr_console::auth::cognito::CognitoConfig;
use amr_console::auth::{CognitoIdentityExchange, CredentialError, IdentityExchange, IdentityProof};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GET_ID: &str = "AWSCognitoIdentityService.GetId";
const GET_CREDENTIALS: &str = "AWSCognitoIdentityService.GetCredentialsForIdentity";
const IDENTITY_ID: &str = "us-east-1:11111111-2222-3333-4444-555555555555";

fn exchange_for(server: &MockServer) -> CognitoIdentityExchange {
    CognitoIdentityExchange::new(CognitoConfig {
        region: "us-east-1".to_string(),
        identity_pool_id: "us-east-1:pool".to_string(),
        user_pool_id: "us-east-1_ABC123".to_string(),
        endpoint: Some(format!("{}/", server.uri())),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

async fn mount_get_id(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(header("x-amz-target", GET_ID))
        .and(header("content-type", "application/x-amz-json-1.1"))
        .and(body_partial_json(json!({
            "IdentityPoolId": "us-east-1:pool",
            "Logins": {"cognito-idp.us-east-1.amazonaws.com/us-east-1_ABC123": "id-token"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "IdentityId": IDENTITY_ID
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn credentials_body() -> serde_json::Value {
    json!({
        "IdentityId": IDENTITY_ID,
        "Credentials": {
            "AccessKeyId": "ASIAEXAMPLE",
            "SecretKey": "secret-example",
            "SessionToken": "session-example",
            "Expiration": 1_704_114_000.0
        }
    })
}

#[tokio::test]
async fn test_exchange_returns_credentials_and_caches_identity_id() {
    // Arrange
    let server = MockServer::start().await;
    mount_get_id(&server, 1).await;
    Mock::given(method("POST"))
        .and(header("x-amz-target", GET_CREDENTIALS))
        .and(body_partial_json(json!({"IdentityId": IDENTITY_ID})))
        .respond_with(ResponseTemplate::new(200).set_body_json(credentials_body()))
        .expect(2)
        .mount(&server)
        .await;
    let exchange = exchange_for(&server);
    let proof = IdentityProof::new("id-token");

    // Act
    let first = exchange.exchange(&proof).await.unwrap();
    let second = exchange.exchange(&proof).await.unwrap();

    // Assert
    assert_eq!(first.access_key_id, "ASIAEXAMPLE");
    assert_eq!(first.secret_access_key, "secret-example");
    assert_eq!(first.session_token.as_deref(), Some("session-example"));
    assert_eq!(first.expires_at.timestamp(), 1_704_114_000);
    assert_eq!(first.identity_id.as_deref(), Some(IDENTITY_ID));
    assert_eq!(second.access_key_id, first.access_key_id);
    assert_eq!(exchange.identity_id().as_deref(), Some(IDENTITY_ID));
}

#[tokio::test]
async fn test_not_authorized_requires_reauthentication() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-amz-target", GET_ID))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "__type": "NotAuthorizedException",
            "message": "Invalid login token. Token expired."
        })))
        .mount(&server)
        .await;
    let exchange = exchange_for(&server);

    let err = exchange
        .exchange(&IdentityProof::new("id-token"))
        .await
        .unwrap_err();

    assert!(matches!(err, CredentialError::IdentityRejected(_)));
    assert!(err.requires_reauthentication());
}

#[tokio::test]
async fn test_missing_credentials_in_response() {
    let server = MockServer::start().await;
    mount_get_id(&server, 1).await;
    Mock::given(method("POST"))
        .and(header("x-amz-target", GET_CREDENTIALS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "IdentityId": IDENTITY_ID
        })))
        .mount(&server)
        .await;
    let exchange = exchange_for(&server);

    let err = exchange
        .exchange(&IdentityProof::new("id-token"))
        .await
        .unwrap_err();

    assert_eq!(err, CredentialError::MissingCredentials);
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;
    let exchange = exchange_for(&server);

    let err = exchange
        .exchange(&IdentityProof::new("id-token"))
        .await
        .unwrap_err();

    assert!(matches!(err, CredentialError::Exchange(ref m) if m.contains("503")));
    assert!(!err.requires_reauthentication());
}

async fn mount_credentials(server: &MockServer) {
    Mock::given(method("POST"))
        .and(header("x-amz-target", GET_CREDENTIALS))
        .respond_with(ResponseTemplate::new(200).set_body_json(credentials_body()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_new_id_token_resolves_new_identity_id() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-amz-target", GET_ID))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "IdentityId": IDENTITY_ID
        })))
        .expect(2)
        .mount(&server)
        .await;
    mount_credentials(&server).await;
    let exchange = exchange_for(&server);

    // Act
    exchange
        .exchange(&IdentityProof::new("token-operator-a"))
        .await
        .unwrap();
    exchange
        .exchange(&IdentityProof::new("token-operator-b"))
        .await
        .unwrap();

    // Assert: GetId expectation of 2 calls is verified when the server drops
}

#[tokio::test]
async fn test_forget_identity_clears_identity_id() {
    let server = MockServer::start().await;
    mount_get_id(&server, 2).await;
    mount_credentials(&server).await;
    let exchange = exchange_for(&server);
    let proof = IdentityProof::new("id-token");

    exchange.exchange(&proof).await.unwrap();
    exchange.forget_identity();
    assert_eq!(exchange.identity_id(), None);

    exchange.exchange(&proof).await.unwrap();
    assert_eq!(exchange.identity_id().as_deref(), Some(IDENTITY_ID));
}
