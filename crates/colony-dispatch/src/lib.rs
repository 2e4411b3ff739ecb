//! Concurrent dispatcher — race one call across interchangeable endpoints.
//!
//! Every dispatch fans out to all healthy endpoints at once; the first
//! non-error response wins and the rest are cancelled. Winners feed a
//! per-endpoint latency table (diagnostics only — the race always includes
//! everyone) and a bounded TTL cache so hot queries never hit the network.

pub mod cache;
pub mod dispatcher;
pub mod endpoint;

pub use cache::TtlCache;
pub use dispatcher::{DispatchError, DispatchSuccess, DispatchTask, Dispatcher};
pub use endpoint::{Endpoint, EndpointError, HttpJsonRpcEndpoint};
