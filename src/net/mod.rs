//! Network seam between the worker and the origin server.
//!
//! Everything the worker sends goes through a [`Transport`]. The production
//! implementation is [`HttpTransport`] (reqwest); tests script a fake one.

mod transport;
mod types;

#[cfg(test)]
pub mod fake;

pub use transport::{HttpTransport, Transport};
pub use types::{Request, Response};
