//! The diagnostics loop: connect, rebuild, audit, settle, test, report.
//!
//! Each attempt runs the whole sequence over a fresh session. Only
//! connectivity failures lead to another attempt; every other error and every
//! domain failure ends the run immediately.

use async_trait::async_trait;
use std::sync::Arc;

use crate::compilation::{FsSnapshotSource, StabilityMonitor};
use crate::config::{DiagConfig, EndpointConfig};
use crate::console::{decode_entries, ConsoleClassifier, ConsoleReport};
use crate::errors::DiagError;
use crate::exit_codes;
use crate::report::DiagnosticsFormatter;
use crate::test_job::{TestJobPoller, TestRunOutcome, TestSummary};
use crate::tools::{RefreshRequest, ToolInvoker};
use crate::transport::{RpcTransport, SessionTransport};

/// Opens a ready-to-use session. Called once per attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RpcTransport>, DiagError>;
}

pub struct HttpConnector {
    endpoint: EndpointConfig,
}

impl HttpConnector {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self) -> Result<Arc<dyn RpcTransport>, DiagError> {
        let mut transport = SessionTransport::new(&self.endpoint)?;
        transport.connect().await?;
        Ok(Arc::new(transport))
    }
}

/// Failures of the project under diagnosis, as opposed to the tooling.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainFailure {
    ConsoleErrors(ConsoleReport),
    TestsFailed(TestSummary),
    NoTestsDiscovered,
    JobErrored(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Success {
        console: ConsoleReport,
        /// `None` when the test phase was skipped.
        tests: Option<TestSummary>,
    },
    Failed(DomainFailure),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            exit_codes::OK
        } else {
            exit_codes::FAILURE
        }
    }
}

pub struct Orchestrator {
    connector: Arc<dyn Connector>,
    config: DiagConfig,
    formatter: DiagnosticsFormatter,
}

impl Orchestrator {
    pub fn new(connector: Arc<dyn Connector>, config: DiagConfig) -> Self {
        Self {
            connector,
            config,
            formatter: DiagnosticsFormatter::plain(),
        }
    }

    pub fn with_formatter(mut self, formatter: DiagnosticsFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub async fn run(&self) -> Result<RunOutcome, DiagError> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run_once().await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    log::warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                    println!(
                        "{}",
                        self.formatter.warn(&format!(
                            "MCP non-responsive (attempt {}/{}). Retrying in {}s...",
                            attempt,
                            max_attempts,
                            self.config.retry.delay_secs
                        ))
                    );
                    tokio::time::sleep(self.config.retry.delay()).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    println!(
                        "{}",
                        self.formatter.fail(&format!(
                            "CRITICAL ERROR: MCP server at {} is unreachable or non-responsive.",
                            self.config.endpoint.url
                        ))
                    );
                    println!("{}", self.formatter.dim(&format!("Technical details: {}", e)));
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    pub async fn run_once(&self) -> Result<RunOutcome, DiagError> {
        let transport = self.connector.connect().await?;
        let invoker = ToolInvoker::new(transport);
        log::info!(
            "Connected to {} (session {})",
            self.config.endpoint.url,
            invoker.session_id().unwrap_or("-")
        );

        if self.config.refresh.enabled {
            self.refresh(&invoker).await?;
        }

        let console = self.audit_console(&invoker).await?;
        if !console.is_clean() {
            println!("{}", self.formatter.console_errors(&console));
            println!(
                "\n{}",
                self.formatter.fail("Diagnostics aborted due to console errors.")
            );
            return Ok(RunOutcome::Failed(DomainFailure::ConsoleErrors(console)));
        }
        println!("{}", self.formatter.ok("Console is clean of errors."));

        if self.config.compilation.enabled {
            let source = FsSnapshotSource::from_config(&self.config.compilation);
            StabilityMonitor::new(
                source,
                self.config.compilation.stability_window(),
                self.config.compilation.poll_interval(),
                self.config.compilation.timeout(),
            )
            .with_formatter(self.formatter)
            .wait_until_stable()
            .await?;
        }

        if self.config.tests.skip {
            println!("{}", self.formatter.report_header());
            println!("Console: {}", self.formatter.ok("Clean"));
            println!("Tests:   {}", self.formatter.dim("skipped"));
            println!("{}", self.formatter.rule());
            println!("{}", self.formatter.verdict(true));
            return Ok(RunOutcome::Success {
                console,
                tests: None,
            });
        }

        let poller = TestJobPoller::from_config(invoker, &self.config.tests)
            .with_formatter(self.formatter);
        let outcome = match poller.run().await? {
            TestRunOutcome::JobErrored(message) => {
                println!("{}", self.formatter.fail(&format!("TEST RUN FAILED: {}", message)));
                RunOutcome::Failed(DomainFailure::JobErrored(message))
            }
            TestRunOutcome::Completed(summary) => self.report_tests(console, summary),
        };
        Ok(outcome)
    }

    async fn refresh(&self, invoker: &ToolInvoker) -> Result<(), DiagError> {
        let refresh = &self.config.refresh;
        println!("{}", self.formatter.step("Requesting editor refresh..."));
        invoker
            .refresh(&RefreshRequest {
                compile: refresh.compile.clone(),
                mode: refresh.mode.clone(),
                scope: refresh.scope.clone(),
                wait_for_ready: refresh.wait_for_ready,
            })
            .await?;
        log::info!("Editor refresh acknowledged");
        Ok(())
    }

    async fn audit_console(&self, invoker: &ToolInvoker) -> Result<ConsoleReport, DiagError> {
        println!("{}", self.formatter.step("Checking editor console..."));
        let console = &self.config.console;
        let payload = invoker.read_console(console.count, &console.format).await?;
        let entries = decode_entries(payload)?;
        let report = ConsoleClassifier::from_config(&console.benign_patterns).classify(&entries);
        log::debug!(
            "Console audit: {} entries, {} benign errors suppressed",
            entries.len(),
            report.suppressed
        );
        println!("      {}", self.formatter.console_stats(&report));
        Ok(report)
    }

    fn report_tests(&self, console: ConsoleReport, summary: TestSummary) -> RunOutcome {
        println!("{}", self.formatter.report_header());
        println!("Console: {}", self.formatter.ok("Clean"));
        println!("{}", self.formatter.test_totals(&summary));
        println!("{}", self.formatter.rule());

        if summary.total == 0 {
            println!("{}", self.formatter.fail("ERROR: No tests were found."));
            return RunOutcome::Failed(DomainFailure::NoTestsDiscovered);
        }
        if summary.failed > 0 {
            println!("{}", self.formatter.fail("FAILED TESTS:"));
            for case in &summary.failing {
                println!("{}", self.formatter.test_case(case));
                println!("{}", "-".repeat(30));
            }
            println!("{}", self.formatter.verdict(false));
            return RunOutcome::Failed(DomainFailure::TestsFailed(summary));
        }

        println!("{}", self.formatter.verdict(true));
        RunOutcome::Success {
            console,
            tests: Some(summary),
        }
    }
}
