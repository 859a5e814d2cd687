//! Request dispatcher: the public entry point of the crate.
//!
//! Keep the public surface small. Implementation details are split into
//! submodules under `src/dispatcher/`.

mod context;
mod core;
mod options;
mod response;
mod ttl;

pub use context::{RequestContext, RequestState};
pub use self::core::Dispatcher;
pub use options::{Method, RequestOptions};
pub use response::{ByteStream, Response, StreamResponse};
pub use ttl::TtlPolicy;
