//! Shared state store — typed bounded collections with lossy subscribers.
//!
//! Every mutating operation is serialised per collection and publishes its
//! revision to subscribers before returning, so a subscriber notified of
//! revision R can always read a view at least as new as R. Cross-collection
//! atomicity is not provided; `snapshot` freezes writers one collection at a
//! time for a best-effort point-in-time view.

pub mod collections;
pub mod persist;
pub mod store;
pub mod subscribe;

pub use collections::StateLimits;
pub use persist::{StateSnapshot, STATE_SCHEMA_VERSION};
pub use store::StateStore;
pub use subscribe::{Published, Subscription};
