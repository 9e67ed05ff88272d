//! HTTP layers of the transport chain.
//!
//! - [`RoundTrip`]: the single "perform request" contract every layer implements
//! - [`RequestRewriter`]: fixes a request's physical destination
//! - [`H2Settings`]: HTTP/2 connection settings for pooled connections

pub mod h2settings;
pub mod responsebody;
pub mod rewrite;
pub mod roundtrip;

// Re-exports for convenience
pub use h2settings::H2Settings;
pub use responsebody::ResponseBody;
pub use rewrite::{RequestRewriter, RewriteTarget};
pub use roundtrip::{Performing, RequestBody, RoundTrip};
