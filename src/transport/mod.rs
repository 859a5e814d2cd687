//! HTTP transport: pooled client, bounded concurrency and per-attempt timeouts.

mod http;

pub use http::{HttpTransport, Outgoing, RawResponse};
