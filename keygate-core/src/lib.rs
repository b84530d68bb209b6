//! Core data models and authentication logic for keygate

pub mod auth;
pub mod error;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::*;
pub use store::*;
pub use types::*;

/// Result type alias for keygate operations
pub type Result<T> = std::result::Result<T, KeygateError>;
