//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): network error codes matching `net_error_list.h`
//! - [`RequestContext`](cancel::RequestContext): per-request cancellation and deadline

pub mod cancel;
pub mod context;
pub mod neterror;
