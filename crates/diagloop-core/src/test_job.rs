//! Asynchronous test job polling
//!
//! A job is submitted with `run_tests_async` and then polled with
//! `get_test_job` until it reaches a terminal status. Status only moves
//! forward: once terminal, later polls are never issued, and a poll reporting an
//! earlier state than the one already seen is ignored.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::config::TestsConfig;
use crate::errors::DiagError;
use crate::report::DiagnosticsFormatter;
use crate::tools::{unwrap_data, ToolInvoker, ToolPayload, RUN_TESTS_ASYNC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Error,
}

impl JobStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "submitted" | "pending" | "queued" => Some(JobStatus::Submitted),
            "running" | "in_progress" => Some(JobStatus::Running),
            "succeeded" | "success" | "completed" | "passed" => Some(JobStatus::Succeeded),
            "failed" | "failure" => Some(JobStatus::Failed),
            "error" | "errored" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Submitted => 0,
            JobStatus::Running => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub completed: u64,
    pub total: Option<u64>,
}

impl fmt::Display for JobProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "{}/{}", self.completed, total),
            None => write!(f, "{}/?", self.completed),
        }
    }
}

/// What one `get_test_job` poll reported. Every field is optional; a poll
/// that carries none of them is not usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<JobProgress>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

fn as_count(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl JobUpdate {
    pub fn from_payload(payload: &ToolPayload) -> Option<Self> {
        let body = unwrap_data(payload.as_structured()?);
        let object = body.as_object()?;

        let status = object
            .get("status")
            .and_then(Value::as_str)
            .and_then(JobStatus::parse);

        let progress_source = object.get("progress").filter(|p| p.is_object()).unwrap_or(body);
        let progress = as_count(progress_source.get("completed")).map(|completed| JobProgress {
            completed,
            total: as_count(progress_source.get("total")),
        });

        let result = object.get("result").filter(|r| !r.is_null()).cloned();
        let error = object.get("error").and_then(|e| match e {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(o) => Some(
                o.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string()),
            ),
            other => Some(other.to_string()),
        });

        let update = JobUpdate {
            status,
            progress,
            result,
            error,
        };
        if update == JobUpdate::default() {
            None
        } else {
            Some(update)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Submitted,
            progress: JobProgress::default(),
            result: None,
            error: None,
        }
    }

    /// Apply a poll. Returns true when status or progress visibly changed.
    pub fn advance(&mut self, update: JobUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let before = (self.status, self.progress);

        if let Some(status) = update.status {
            if status.rank() >= self.status.rank() {
                self.status = status;
            } else {
                log::debug!(
                    "Ignoring regressed status {} for job {} (currently {})",
                    status,
                    self.job_id,
                    self.status
                );
            }
        }
        if let Some(progress) = update.progress {
            if progress.completed >= self.progress.completed {
                self.progress = JobProgress {
                    completed: progress.completed,
                    total: progress.total.or(self.progress.total),
                };
            }
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        if update.error.is_some() {
            self.error = update.error;
        }

        before != (self.status, self.progress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestState {
    Passed,
    Failed,
    Skipped,
    Inconclusive,
}

impl TestState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "passed" | "success" => TestState::Passed,
            "failed" | "failure" => TestState::Failed,
            "skipped" | "ignored" => TestState::Skipped,
            _ => TestState::Inconclusive,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestState::Passed => "PASSED",
            TestState::Failed => "FAILED",
            TestState::Skipped => "SKIPPED",
            TestState::Inconclusive => "INCONCLUSIVE",
        }
    }
}

impl Default for TestState {
    fn default() -> Self {
        TestState::Inconclusive
    }
}

impl<'de> Deserialize<'de> for TestState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(TestState::parse(&raw))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TestCaseResult {
    #[serde(rename = "fullName", alias = "name", default)]
    pub full_name: String,
    #[serde(default)]
    pub state: TestState,
    #[serde(rename = "durationSeconds", alias = "duration", default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "stackTrace", alias = "stack_trace", default)]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestSummary {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total: u64,
    pub failing: Vec<TestCaseResult>,
}

impl TestSummary {
    pub fn from_cases(cases: Vec<TestCaseResult>) -> Self {
        let count = |state: TestState| cases.iter().filter(|c| c.state == state).count() as u64;
        let passed = count(TestState::Passed);
        let failed = count(TestState::Failed);
        let skipped = count(TestState::Skipped);
        let total = cases.len() as u64;
        Self {
            passed,
            failed,
            skipped,
            total,
            failing: failing_cases(cases),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.total > 0
    }
}

fn failing_cases(cases: Vec<TestCaseResult>) -> Vec<TestCaseResult> {
    cases
        .into_iter()
        .filter(|c| c.state == TestState::Failed)
        .collect()
}

#[derive(Deserialize)]
struct SummaryCounts {
    #[serde(default)]
    passed: u64,
    #[serde(default)]
    failed: u64,
    #[serde(default)]
    skipped: u64,
    total: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResultShape {
    Summarised {
        summary: SummaryCounts,
        #[serde(default)]
        results: Vec<TestCaseResult>,
    },
    Listed {
        results: Vec<TestCaseResult>,
    },
    Bare(Vec<TestCaseResult>),
}

/// Extract a [`TestSummary`] from a terminal job's result payload.
pub fn decode_summary(result: &Value) -> Result<TestSummary, DiagError> {
    // Some servers hand the result back still encoded as text.
    let decoded;
    let result = match result {
        Value::String(text) => match ToolPayload::from_text(text) {
            ToolPayload::Structured(value) => {
                decoded = value;
                &decoded
            }
            _ => return Err(DiagError::unrecognized_shape("test job result")),
        },
        other => other,
    };

    match serde_json::from_value::<ResultShape>(unwrap_data(result).clone()) {
        Ok(ResultShape::Summarised { summary, results }) => Ok(TestSummary {
            passed: summary.passed,
            failed: summary.failed,
            skipped: summary.skipped,
            total: summary.total,
            failing: failing_cases(results),
        }),
        Ok(ResultShape::Listed { results }) | Ok(ResultShape::Bare(results)) => {
            Ok(TestSummary::from_cases(results))
        }
        Err(_) => Err(DiagError::unrecognized_shape("test job result")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestRunOutcome {
    Completed(TestSummary),
    /// The job itself broke; carries the server's error text.
    JobErrored(String),
}

pub struct TestJobPoller {
    invoker: ToolInvoker,
    mode: String,
    save_scene: bool,
    interval: Duration,
    timeout: Duration,
    formatter: DiagnosticsFormatter,
}

impl TestJobPoller {
    pub fn new(invoker: ToolInvoker, mode: &str, interval: Duration, timeout: Duration) -> Self {
        Self {
            invoker,
            mode: mode.to_string(),
            save_scene: false,
            interval,
            timeout,
            formatter: DiagnosticsFormatter::plain(),
        }
    }

    pub fn from_config(invoker: ToolInvoker, config: &TestsConfig) -> Self {
        Self::new(invoker, &config.mode, config.poll_interval(), config.timeout())
            .with_scene_save(config.save_scene)
    }

    pub fn with_scene_save(mut self, save_scene: bool) -> Self {
        self.save_scene = save_scene;
        self
    }

    pub fn with_formatter(mut self, formatter: DiagnosticsFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub async fn submit(&self) -> Result<JobHandle, DiagError> {
        if self.save_scene {
            println!("{}", self.formatter.step("Saving current scene..."));
            if let Err(e) = self.invoker.save_scene().await {
                if e.is_retryable() {
                    return Err(e);
                }
                log::warn!("Scene save failed, continuing with tests: {}", e);
            }
        }

        println!(
            "{}",
            self.formatter
                .step(&format!("Running all {} tests...", self.mode))
        );
        let payload = self.invoker.run_tests_async(&self.mode).await?;
        let body = payload.into_structured(RUN_TESTS_ASYNC)?;
        let job_id = match unwrap_data(&body).get("job_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(DiagError::Protocol(format!(
                    "{} response carried no job_id",
                    RUN_TESTS_ASYNC
                )))
            }
        };
        log::info!("Submitted test job {}", job_id);
        Ok(JobHandle::new(job_id))
    }

    /// Poll until the job is terminal. Calling this on a terminal handle
    /// returns immediately without issuing a request.
    pub async fn poll_until_terminal(&self, handle: &mut JobHandle) -> Result<(), DiagError> {
        let started = tokio::time::Instant::now();
        while !handle.status.is_terminal() {
            let payload = self.invoker.get_test_job(&handle.job_id).await.map_err(|e| {
                log::error!("Poll for job {} failed: {}", handle.job_id, e);
                e
            })?;
            match JobUpdate::from_payload(&payload) {
                Some(update) => {
                    if handle.advance(update) {
                        println!("{}", self.formatter.job_progress(handle.status, &handle.progress));
                    }
                }
                None => log::debug!("Ignoring unusable poll for job {}", handle.job_id),
            }

            if handle.status.is_terminal() {
                break;
            }
            if started.elapsed() >= self.timeout {
                return Err(DiagError::JobTimeout {
                    job_id: handle.job_id.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.interval).await;
        }
        Ok(())
    }

    pub fn outcome(handle: &JobHandle) -> Result<TestRunOutcome, DiagError> {
        match handle.status {
            JobStatus::Error => Ok(TestRunOutcome::JobErrored(
                handle
                    .error
                    .clone()
                    .unwrap_or_else(|| "job reported an error without details".to_string()),
            )),
            JobStatus::Succeeded | JobStatus::Failed => {
                let result = handle.result.as_ref().ok_or_else(|| {
                    DiagError::Protocol("job finished without retrievable result".to_string())
                })?;
                Ok(TestRunOutcome::Completed(decode_summary(result)?))
            }
            JobStatus::Submitted | JobStatus::Running => Err(DiagError::Protocol(format!(
                "job {} is not finished",
                handle.job_id
            ))),
        }
    }

    pub async fn run(&self) -> Result<TestRunOutcome, DiagError> {
        let mut handle = self.submit().await?;
        self.poll_until_terminal(&mut handle).await?;
        log::info!("Test job {} finished with status {}", handle.job_id, handle.status);
        Self::outcome(&handle)
    }
}
