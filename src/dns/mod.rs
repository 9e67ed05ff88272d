//! Address Resolution Module
//!
//! Candidate addresses that are hostnames rather than IP literals are
//! resolved through the [`Resolve`] trait before dialing:
//! - [`GaiResolver`]: system resolver (getaddrinfo via thread pool)
//!
//! # Example
//!
//! ```rust,ignore
//! use dohnet::dns::{GaiResolver, Name, Resolve};
//!
//! let resolver = GaiResolver::new();
//! let addrs = resolver.resolve(Name::new("dns.example.com")).await?;
//! ```

mod gai;
mod resolve;

pub use gai::{try_parse_ip, GaiResolver};
pub use resolve::{Addrs, Name, Resolve, Resolving};
