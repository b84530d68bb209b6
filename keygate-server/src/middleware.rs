//! Authentication middleware: credential extraction, principal injection,
//! and failure responses

use crate::server::{json_response, AppState, Response};
use hyper::header::{AUTHORIZATION, HOST};
use hyper::{Request, StatusCode};
use keygate_core::auth::AuthRequest;
use keygate_core::{ErrorKind, KeygateError, Policy, Principal};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

pub const X_FIREBASE_TOKEN: &str = "x-firebase-token";
pub const X_NOSTR_AUTHORIZATION: &str = "x-nostr-authorization";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

fn header<B>(req: &Request<B>, name: impl hyper::header::AsHeaderName) -> Option<&str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

/// Absolute URL the client addressed, as a signed event must name it
pub fn request_url<B>(req: &Request<B>, trust_forwarded_proto: bool) -> String {
    let forwarded = trust_forwarded_proto
        .then(|| header(req, X_FORWARDED_PROTO))
        .flatten()
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|scheme| !scheme.is_empty());

    let scheme = forwarded
        .or_else(|| req.uri().scheme_str())
        .unwrap_or("http");

    let host = header(req, HOST)
        .or_else(|| req.uri().authority().map(|authority| authority.as_str()))
        .unwrap_or_default();

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{}://{}{}", scheme, host, path_and_query)
}

/// Credential-bearing view of an HTTP request
pub fn auth_request<B>(req: &Request<B>, trust_forwarded_proto: bool) -> AuthRequest {
    AuthRequest {
        method: req.method().as_str().to_string(),
        url: request_url(req, trust_forwarded_proto),
        authorization: header(req, AUTHORIZATION).map(str::to_string),
        firebase_token: header(req, X_FIREBASE_TOKEN).map(str::to_string),
        nostr_authorization: header(req, X_NOSTR_AUTHORIZATION).map(str::to_string),
    }
}

/// Run a store-touching call on the blocking pool
pub async fn blocking<T, F>(f: F) -> Result<T, KeygateError>
where
    F: FnOnce() -> Result<T, KeygateError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KeygateError::Internal(format!("store task failed: {}", e)))?
}

/// Authenticate under `policy` and publish the principal in the request
/// extensions.
///
/// Protocol paths resolve through the link store, so evaluation runs on the
/// blocking pool.
pub async fn require_principal<B>(
    state: &Arc<AppState>,
    policy: Policy,
    req: &mut Request<B>,
) -> Result<Principal, KeygateError> {
    let request = auth_request(req, state.trust_forwarded_proto);
    let state = Arc::clone(state);
    let principal = blocking(move || state.authenticator.authenticate(policy, &request)).await?;
    req.extensions_mut().insert(principal.clone());
    Ok(principal)
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MissingCredential
        | ErrorKind::MalformedCredential
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredOrFutureTimestamp
        | ErrorKind::UrlMismatch
        | ErrorKind::MethodMismatch
        | ErrorKind::ProtocolViolation
        | ErrorKind::ProviderVerificationFailure
        | ErrorKind::UnknownPrincipal => StatusCode::UNAUTHORIZED,
        ErrorKind::InactiveAccount | ErrorKind::PrincipalMismatch | ErrorKind::NotOwner => {
            StatusCode::FORBIDDEN
        }
        ErrorKind::LinkConflict | ErrorKind::AlreadyUnlinked => StatusCode::CONFLICT,
        ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// JSON `{"error": ...}` response for a failure
pub fn error_response(err: &KeygateError) -> Response {
    let kind = err.kind();
    let status = status_for(kind);

    let message = match kind {
        ErrorKind::Storage => {
            error!(error = %err, "store unavailable");
            "storage unavailable".to_string()
        }
        ErrorKind::Internal => {
            error!(error = %err, "internal failure");
            "internal error".to_string()
        }
        _ => {
            warn!(%kind, "request rejected");
            err.to_string()
        }
    };

    json_response(status, json!({ "error": message }))
}
