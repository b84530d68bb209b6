//! HTTP/1.1 server implementation

use crate::config::ServerConfig;
use crate::handlers::handle_request;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use keygate_core::auth::{Authenticator, ProtocolValidator, ProviderTokenVerifier, SchnorrVerifier, UsageRecorder};
use keygate_core::IdentityLinkStore;
use keygate_engine::StorageEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type Response = hyper::Response<Full<Bytes>>;

/// Shared per-process request state
pub struct AppState {
    pub authenticator: Authenticator,
    pub trust_forwarded_proto: bool,
}

impl AppState {
    pub fn new(authenticator: Authenticator, trust_forwarded_proto: bool) -> Self {
        AppState {
            authenticator,
            trust_forwarded_proto,
        }
    }

    pub fn links(&self) -> &Arc<dyn IdentityLinkStore> {
        self.authenticator.links()
    }

    /// Wire up the store, verifiers and usage worker described by `config`.
    ///
    /// Must be called inside a tokio runtime; the returned handle is the
    /// usage worker.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<(Self, JoinHandle<()>)> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create data directory {}", config.data_dir.display()))?;

        let engine = StorageEngine::new(&config.data_dir).context("failed to open link store")?;
        let links: Arc<dyn IdentityLinkStore> = Arc::new(engine.link_store()?);
        info!(data_dir = %config.data_dir.display(), "link store opened");

        let mut tokens = ProviderTokenVerifier::firebase(&config.project_id);
        match &config.provider_keys {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read provider keys {}", path.display()))?;
                let count = tokens
                    .add_pem_keys_json(&json)
                    .with_context(|| format!("invalid provider keys in {}", path.display()))?;
                info!(count, project = %config.project_id, "provider keys loaded");
            }
            None => warn!("no provider keys configured, bearer tokens will be rejected"),
        }

        let protocol = ProtocolValidator::new(Arc::new(SchnorrVerifier::new()))
            .with_max_skew(config.max_skew_secs);

        let (recorder, worker) = UsageRecorder::spawn(Arc::clone(&links));
        let authenticator = Authenticator::new(Arc::new(tokens), Arc::new(protocol), links)
            .with_usage_recorder(recorder);

        Ok((AppState::new(authenticator, config.trust_forwarded_proto), worker))
    }
}

pub struct KeygateServer {
    state: Arc<AppState>,
}

impl KeygateServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub async fn bind(self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        info!("keygate server listening on {}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            debug!("New connection from {}", remote_addr);

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                Self::handle_connection(stream, remote_addr, state).await;
            });
        }
    }

    async fn handle_connection(stream: TcpStream, remote_addr: SocketAddr, state: Arc<AppState>) {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req| {
            let state = Arc::clone(&state);
            async move { handle_request(req, state).await }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            error!("Connection error from {}: {}", remote_addr, err);
        }
    }
}

/// JSON response with the given status
pub fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    let mut response = hyper::Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    headers.insert(
        hyper::header::SERVER,
        hyper::header::HeaderValue::from_static(concat!("keygate/", env!("CARGO_PKG_VERSION"))),
    );
    response
}
