//! Configuration for the diagnostics loop
//!
//! Settings come from an optional YAML file, then the `DIAGLOOP_MCP_URL`
//! environment variable, then command-line flags applied by the binary.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;
