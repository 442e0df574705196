//! Operator HTTP surface
//!
//! Thin warp layer over [`ConsoleHandle`]: every route reads the published
//! status or forwards one command to the orchestrator task.

use crate::auth::IdentityProof;
use crate::error::ConsoleError;
use crate::protocol::DeviceState;
use crate::session::{ConsoleHandle, ConsoleStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Everything the status panel renders
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: ConsoleStatus,
    pub device: DeviceState,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub destination: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub id_token: String,
}

#[derive(Debug, Serialize)]
pub struct LabelResponse {
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct ApiDocumentationResponse {
    pub endpoints: BTreeMap<String, String>,
}

/// HTTP status for a failed operator command
pub fn error_status(err: &ConsoleError) -> StatusCode {
    match err {
        ConsoleError::NotConnected => StatusCode::CONFLICT,
        ConsoleError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
        ConsoleError::Publish { .. } => StatusCode::BAD_GATEWAY,
        ConsoleError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(err: &ConsoleError) -> warp::reply::WithStatus<warp::reply::Json> {
    let body = ErrorResponse {
        error: err.operator_message(),
        label: err.status_label().to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), error_status(err))
}

fn with_handle(
    handle: ConsoleHandle,
) -> impl Filter<Extract = (ConsoleHandle,), Error = Infallible> + Clone {
    warp::any().map(move || handle.clone())
}

/// All console routes
pub fn routes(
    handle: ConsoleHandle,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    // GET /status - connection status and device state
    let status_route = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_handle(handle.clone()))
        .map(|handle: ConsoleHandle| {
            warp::reply::json(&StatusResponse {
                status: handle.status(),
                device: handle.device(),
            })
        });

    // GET /health - 200 only while live
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_handle(handle.clone()))
        .map(|handle: ConsoleHandle| {
            let status = handle.status();
            let healthy = status.state.is_live();
            let code = if healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            warp::reply::with_status(
                warp::reply::json(&HealthResponse {
                    healthy,
                    label: status.label,
                }),
                code,
            )
        });

    // POST /call - issue a call command
    let call_route = warp::path("call")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_handle(handle.clone()))
        .and_then(|request: CallRequest, handle: ConsoleHandle| async move {
            let reply = match handle.call(request.destination).await {
                Ok(command) => {
                    warp::reply::with_status(warp::reply::json(&command), StatusCode::ACCEPTED)
                }
                Err(e) => {
                    warn!("Call command rejected: {}", e);
                    error_reply(&e)
                }
            };
            Ok::<_, Infallible>(reply)
        });

    // POST /sign-in - supply a fresh identity proof
    let sign_in_route = warp::path("sign-in")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_handle(handle.clone()))
        .and_then(|request: SignInRequest, handle: ConsoleHandle| async move {
            let reply = match handle.sign_in(IdentityProof::new(request.id_token)).await {
                Ok(()) => label_reply(&handle),
                Err(e) => error_reply(&e),
            };
            Ok::<_, Infallible>(reply)
        });

    // POST /sign-out - tear down and forget the identity
    let sign_out_route = warp::path("sign-out")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_handle(handle))
        .and_then(|handle: ConsoleHandle| async move {
            let reply = match handle.sign_out().await {
                Ok(()) => label_reply(&handle),
                Err(e) => error_reply(&e),
            };
            Ok::<_, Infallible>(reply)
        });

    // GET / - endpoint listing
    let root_route = warp::path::end().and(warp::get()).map(|| {
        let endpoints = [
            ("GET /status", "Connection status, shadow status and device state"),
            ("GET /health", "200 while live, 503 otherwise"),
            ("POST /call", "Send the robot to {\"destination\": \"...\"}"),
            ("POST /sign-in", "Re-authenticate with {\"idToken\": \"...\"}"),
            ("POST /sign-out", "Disconnect and forget the identity"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        warp::reply::json(&ApiDocumentationResponse { endpoints })
    });

    status_route
        .or(health_route)
        .or(call_route)
        .or(sign_in_route)
        .or(sign_out_route)
        .or(root_route)
}

fn label_reply(handle: &ConsoleHandle) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&LabelResponse {
            label: handle.status().label,
        }),
        StatusCode::OK,
    )
}

/// Serve the console until `shutdown` resolves
pub async fn serve(
    handle: ConsoleHandle,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (bound, server) =
        warp::serve(routes(handle)).try_bind_with_graceful_shutdown(addr, shutdown)?;
    info!(%bound, "Console HTTP surface listening");
    server.await;
    Ok(())
}
