//! Tool catalog — the only doorway from model output to executable code.
//!
//! Tools are registered once at startup and the catalog is immutable
//! afterwards. Every requested invocation is looked up by name, its
//! arguments validated against the declared schema, and executed under the
//! tool's own timeout; whatever goes wrong becomes a structured failed
//! invocation, never a crash of the loop.

pub mod catalog;
pub mod validate;

pub use catalog::{invocation_body, Tool, ToolCatalog};
pub use validate::{validate_args, validate_tool_schemas, SchemaError};
