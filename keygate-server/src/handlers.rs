//! HTTP request handlers for keygate server

use crate::middleware::{auth_request, blocking, error_response, require_principal};
use crate::server::{json_response, AppState, Response};
use hyper::{Method, Request, StatusCode};
use keygate_core::{IdentityLink, IdentityLinkStore, KeygateError, Policy, Principal, Result};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct LinksResponse {
    subject_id: String,
    links: Vec<IdentityLink>,
}

/// Main request handler
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> std::result::Result<Response, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Handling {} {}", method, path);

    let result = match (&method, path.as_str()) {
        (&Method::GET, "/health") => Ok(handle_health()),
        (&Method::GET, "/v1/whoami") => handle_whoami(req, state).await,
        (&Method::POST, "/v1/identity/link") => handle_link(req, state).await,
        (&Method::DELETE, "/v1/identity/link") => handle_unlink(req, state).await,
        (&Method::GET, "/v1/identity/links") => handle_list_links(req, state).await,
        _ => Ok(json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" }))),
    };

    let response = result.unwrap_or_else(|e| error_response(&e));
    info!("{} {} -> {}", method, path, response.status());
    Ok(response)
}

fn handle_health() -> Response {
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "service": "keygate"
        }),
    )
}

async fn handle_whoami<B>(mut req: Request<B>, state: Arc<AppState>) -> Result<Response> {
    require_principal(&state, Policy::Flexible, &mut req).await?;

    let principal = req
        .extensions()
        .get::<Principal>()
        .ok_or_else(|| KeygateError::Internal("principal missing after authentication".to_string()))?;

    Ok(json_response(StatusCode::OK, serde_json::to_value(principal)?))
}

async fn handle_link<B>(req: Request<B>, state: Arc<AppState>) -> Result<Response> {
    let proof = state
        .authenticator
        .verify_link_request(&auth_request(&req, state.trust_forwarded_proto))?;

    let links = Arc::clone(state.links());
    let link = blocking(move || links.link(&proof.pubkey, &proof.subject)).await?;

    info!(pubkey = %link.pubkey, subject = %link.subject_id, "link request accepted");
    Ok(json_response(StatusCode::OK, serde_json::to_value(&link)?))
}

async fn handle_unlink<B>(req: Request<B>, state: Arc<AppState>) -> Result<Response> {
    let proof = state
        .authenticator
        .verify_link_request(&auth_request(&req, state.trust_forwarded_proto))?;

    let links = Arc::clone(state.links());
    let link = blocking(move || links.unlink(&proof.pubkey, &proof.subject)).await?;

    info!(pubkey = %link.pubkey, subject = %link.subject_id, "unlink request accepted");
    Ok(json_response(StatusCode::OK, serde_json::to_value(&link)?))
}

async fn handle_list_links<B>(mut req: Request<B>, state: Arc<AppState>) -> Result<Response> {
    let principal = require_principal(&state, Policy::TokenOnly, &mut req).await?;

    let links = Arc::clone(state.links());
    let subject = principal.subject_id.clone();
    let active = blocking(move || links.list_active(&subject)).await?;

    let body = LinksResponse {
        subject_id: principal.subject_id.as_str().to_string(),
        links: active,
    };
    Ok(json_response(StatusCode::OK, serde_json::to_value(&body)?))
}
