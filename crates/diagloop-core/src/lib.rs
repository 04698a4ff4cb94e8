//! Core of the editor diagnostics loop.
//!
//! `diagloop` talks to an editor-automation endpoint over MCP (JSON-RPC 2.0 on
//! HTTP) and walks one project through a fixed feedback cycle:
//!
//! - **Session**: query the endpoint, obtain a session id and run the
//!   `initialize` handshake ([`transport`])
//! - **Rebuild**: ask the editor to refresh and recompile ([`tools`])
//! - **Console audit**: classify console entries and fail on real errors ([`console`])
//! - **Build settling**: wait until build artifacts are newer than every source
//!   and have been quiet for a while ([`compilation`])
//! - **Tests**: submit an asynchronous test job and poll it to completion ([`test_job`])
//!
//! [`orchestrator::Orchestrator`] sequences the phases and retries connectivity
//! failures; [`report`] renders everything for the terminal.

pub mod compilation;
pub mod config;
pub mod console;
pub mod errors;
pub mod exit_codes;
pub mod orchestrator;
pub mod report;
pub mod test_job;
pub mod tools;
pub mod transport;

pub use config::*;
pub use errors::DiagError;
pub use orchestrator::{Connector, DomainFailure, HttpConnector, Orchestrator, RunOutcome};
pub use report::DiagnosticsFormatter;

#[cfg(test)]
pub mod test_utils;
