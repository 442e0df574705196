//! SigV4 query-string signing for the MQTT-over-WebSocket endpoint
//!
//! Produces a presigned `wss://` URL. The remote authorizer recomputes the
//! signature byte-for-byte, so the canonical form below must not drift:
//!
//! ```text
//! GET
//! /mqtt
//! X-Amz-Algorithm=...&X-Amz-Credential=...&X-Amz-Date=...&X-Amz-SignedHeaders=host
//! host:<host>
//!
//! host
//! <sha256("")>
//! ```
//!
//! The session token is appended to the final URL after the signature and is
//! never part of the canonical query string.

use crate::auth::Credentials;
use crate::clock::Clock;
use crate::config::IotSection;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const DEFAULT_SERVICE: &str = "iotdevicegateway";
pub const DEFAULT_PATH: &str = "/mqtt";

/// SHA-256 of the empty payload
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// RFC 3986 unreserved characters pass through; everything else is escaped
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SigningError {
    #[error("Credentials expired at {expired_at}; refusing to sign")]
    CredentialsExpired { expired_at: DateTime<Utc> },
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
    #[error("Missing signing input: {0}")]
    MissingInput(&'static str),
}

/// A presigned connection URL, valid for one signing window from `issued_at`
#[derive(Clone, PartialEq)]
pub struct SignedConnectionDescriptor {
    pub host: String,
    pub path: String,
    pub full_url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignedConnectionDescriptor {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.issued_at && now < self.expires_at
    }

    /// `X-Amz-Date` value embedded in the URL
    pub fn amz_date(&self) -> String {
        format_amz_date(self.issued_at)
    }

    pub fn has_session_token(&self) -> bool {
        self.full_url.contains("&X-Amz-Security-Token=")
    }
}

// The URL embeds the signature and session token.
impl std::fmt::Debug for SignedConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedConnectionDescriptor")
            .field("host", &self.host)
            .field("path", &self.path)
            .field("full_url", &"***")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Endpoint parameters that stay fixed across connection attempts
#[derive(Debug, Clone)]
pub struct SigningParams {
    pub host: String,
    pub region: String,
    pub service: String,
    pub path: String,
    pub window: Duration,
}

impl SigningParams {
    pub fn from_iot(iot: &IotSection) -> Self {
        Self {
            host: iot.endpoint.clone(),
            region: iot.region.clone(),
            service: iot.service_name.clone(),
            path: DEFAULT_PATH.to_string(),
            window: Duration::seconds(iot.signing_window_secs as i64),
        }
    }
}

/// Request Signer bound to an endpoint and a clock
pub struct RequestSigner {
    params: SigningParams,
    clock: Arc<dyn Clock>,
}

impl RequestSigner {
    pub fn new(params: SigningParams, clock: Arc<dyn Clock>) -> Self {
        Self { params, clock }
    }

    pub fn params(&self) -> &SigningParams {
        &self.params
    }

    /// Sign a connection URL for `credentials` at the current instant
    pub fn sign(
        &self,
        credentials: &Credentials,
    ) -> Result<SignedConnectionDescriptor, SigningError> {
        sign_at(credentials, &self.params, self.clock.now())
    }
}

/// Sign a connection URL at an explicit instant
///
/// Deterministic: identical inputs always produce the identical URL.
pub fn sign_at(
    credentials: &Credentials,
    params: &SigningParams,
    now: DateTime<Utc>,
) -> Result<SignedConnectionDescriptor, SigningError> {
    if credentials.is_expired(now) {
        return Err(SigningError::CredentialsExpired {
            expired_at: credentials.expires_at,
        });
    }
    if params.host.is_empty() {
        return Err(SigningError::MissingInput("host"));
    }
    if params.region.is_empty() {
        return Err(SigningError::MissingInput("region"));
    }
    if credentials.access_key_id.is_empty() {
        return Err(SigningError::MissingInput("access key id"));
    }

    let amz_date = format_amz_date(now);
    let date_stamp = &amz_date[..8];
    let scope = credential_scope(date_stamp, &params.region, &params.service);

    let canonical_query = canonical_query_string(&credentials.access_key_id, &scope, &amz_date);
    let request = canonical_request(&params.path, &canonical_query, &params.host);
    let to_sign = string_to_sign(&amz_date, &scope, &request);

    let key = signing_key(
        &credentials.secret_access_key,
        date_stamp,
        &params.region,
        &params.service,
    )?;
    let signature = hex::encode(hmac_sha256(&key, to_sign.as_bytes())?);

    let mut full_url = format!(
        "wss://{}{}?{}&X-Amz-Signature={}",
        params.host, params.path, canonical_query, signature
    );
    if let Some(token) = credentials.session_token.as_deref().filter(|t| !t.is_empty()) {
        full_url.push_str("&X-Amz-Security-Token=");
        full_url.push_str(&encode(token));
    }

    debug!(
        host = %params.host,
        amz_date = %amz_date,
        has_session_token = credentials.session_token.is_some(),
        "Signed connection URL"
    );

    Ok(SignedConnectionDescriptor {
        host: params.host.clone(),
        path: params.path.clone(),
        full_url,
        issued_at: now,
        expires_at: now + params.window,
    })
}

/// `YYYYMMDDTHHMMSSZ` in UTC
pub fn format_amz_date(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

fn credential_scope(date_stamp: &str, region: &str, service: &str) -> String {
    format!("{date_stamp}/{region}/{service}/aws4_request")
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE_SET).to_string()
}

/// Canonical query without the security token, keys in lexicographic order
pub fn canonical_query_string(access_key_id: &str, scope: &str, amz_date: &str) -> String {
    let mut params = [
        ("X-Amz-Algorithm", ALGORITHM.to_string()),
        (
            "X-Amz-Credential",
            format!("{access_key_id}/{scope}"),
        ),
        ("X-Amz-Date", amz_date.to_string()),
        ("X-Amz-SignedHeaders", "host".to_string()),
    ];
    params.sort_by(|a, b| a.0.cmp(b.0));

    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn canonical_request(path: &str, canonical_query: &str, host: &str) -> String {
    format!("GET\n{path}\n{canonical_query}\nhost:{host}\n\nhost\n{EMPTY_PAYLOAD_SHA256}")
}

fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    let hashed = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{amz_date}\n{scope}\n{hashed}")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Four-step HMAC chain: date, region, service, `aws4_request`
pub fn signing_key(
    secret_access_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let k_date = hmac_sha256(
        format!("AWS4{secret_access_key}").as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}
