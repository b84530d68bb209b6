//! keygate HTTP server: configuration, authentication middleware and
//! identity-link endpoints

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::{LogFormat, ServerConfig};
pub use server::{AppState, KeygateServer};
