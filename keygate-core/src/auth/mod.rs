//! Request authentication
//!
//! - Signed-event decoding and validation (HTTP auth kind 27235)
//! - Provider bearer token verification (RS256)
//! - Policy composition of the two mechanisms
//! - Background key usage tracking

pub mod canonical;
pub mod jwt;
pub mod keys;
pub mod orchestrator;
pub mod protocol;
pub mod timing;
pub mod usage;

pub use canonical::*;
pub use jwt::*;
pub use keys::*;
pub use orchestrator::*;
pub use protocol::*;
pub use timing::*;
pub use usage::*;
