//! Terminal presentation of console entries, test results and the final report.
//!
//! Every method returns a `String`; callers decide where it goes. Color is a
//! plain flag resolved once at startup.

use owo_colors::OwoColorize;
use std::path::PathBuf;

use crate::console::{ConsoleReport, LogEntry, Severity};
use crate::test_job::{JobProgress, JobStatus, TestCaseResult, TestState, TestSummary};

const RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Error,
    Warning,
    Info,
    Success,
    Dim,
    Strong,
    Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsFormatter {
    pub enable_color: bool,
}

impl DiagnosticsFormatter {
    pub fn new(enable_color: bool) -> Self {
        Self { enable_color }
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        if !self.enable_color {
            return text.to_string();
        }
        match tone {
            Tone::Error => text.red().bold().to_string(),
            Tone::Warning => text.yellow().to_string(),
            Tone::Info => text.cyan().to_string(),
            Tone::Success => text.green().to_string(),
            Tone::Dim => text.dimmed().to_string(),
            Tone::Strong => text.bold().to_string(),
            Tone::Location => text.underline().to_string(),
        }
    }

    pub fn step(&self, message: &str) -> String {
        format!("[*] {}", message)
    }

    pub fn ok(&self, message: &str) -> String {
        self.paint(&format!("[OK] {}", message), Tone::Success)
    }

    pub fn info(&self, message: &str) -> String {
        self.paint(message, Tone::Info)
    }

    pub fn warn(&self, message: &str) -> String {
        self.paint(&format!("[!] {}", message), Tone::Warning)
    }

    pub fn fail(&self, message: &str) -> String {
        self.paint(&format!("[!] {}", message), Tone::Error)
    }

    pub fn dim(&self, message: &str) -> String {
        self.paint(message, Tone::Dim)
    }

    pub fn rule(&self) -> String {
        "=".repeat(RULE_WIDTH)
    }

    fn severity_tone(severity: &Severity) -> Tone {
        match severity {
            Severity::Warning => Tone::Warning,
            Severity::Log => Tone::Info,
            Severity::Other(_) => Tone::Strong,
            _ => Tone::Error,
        }
    }

    /// `[ERROR] file:line` header followed by the message, every line indented.
    pub fn log_entry(&self, entry: &LogEntry, indent: &str) -> String {
        let header = self.paint(
            &format!("[{}]", entry.severity.label()),
            Self::severity_tone(&entry.severity),
        );
        let mut text = match entry.location() {
            Some(location) => format!("{} {}", header, self.paint(&location, Tone::Location)),
            None => header,
        };
        text.push('\n');
        text.push_str(&entry.message);
        text.lines()
            .map(|line| format!("{}{}", indent, line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn console_stats(&self, report: &ConsoleReport) -> String {
        format!(
            "Console Stats: {} | {} | {}",
            self.paint(&format!("{} Errors", report.errors.len()), Tone::Error),
            self.paint(&format!("{} Warnings", report.warnings.len()), Tone::Warning),
            self.paint(&format!("{} Logs", report.logs.len()), Tone::Info),
        )
    }

    pub fn console_errors(&self, report: &ConsoleReport) -> String {
        let mut out = vec![self.paint("!!! CONSOLE ERRORS FOUND !!!", Tone::Error), self.rule()];
        let blocks: Vec<String> = report
            .errors
            .iter()
            .map(|entry| self.log_entry(entry, ""))
            .collect();
        out.push(blocks.join(&format!("\n{}\n", "-".repeat(40))));
        out.join("\n")
    }

    pub fn test_case(&self, case: &TestCaseResult) -> String {
        let tone = match case.state {
            TestState::Passed => Tone::Success,
            TestState::Failed => Tone::Error,
            _ => Tone::Warning,
        };
        let name = if case.full_name.is_empty() {
            "Unknown Test"
        } else {
            case.full_name.as_str()
        };
        let mut out = format!(
            "{} {} ({:.3}s)",
            self.paint(&format!("[{}]", case.state.label()), tone),
            name,
            case.duration_seconds
        );
        if let Some(message) = case.message.as_deref().filter(|m| !m.is_empty()) {
            out.push_str(&format!("\n  {}", self.paint(message, Tone::Error)));
        }
        if let Some(stack) = case.stack_trace.as_deref() {
            for line in stack.lines() {
                out.push_str(&format!("\n    {}", self.dim(line)));
            }
        }
        out
    }

    pub fn test_totals(&self, summary: &TestSummary) -> String {
        let mut line = format!(
            "Tests:   {} | {} (Total: {})",
            self.paint(&format!("{} Passed", summary.passed), Tone::Success),
            self.paint(&format!("{} Failed", summary.failed), Tone::Error),
            summary.total
        );
        if summary.skipped > 0 {
            line.push_str(&format!(" {}", self.dim(&format!("[{} skipped]", summary.skipped))));
        }
        line
    }

    pub fn pending_files(&self, pending: &[PathBuf]) -> String {
        let mut out = self.paint(
            &format!("[WAIT] {} files modified since last build:", pending.len()),
            Tone::Warning,
        );
        for path in pending {
            out.push_str(&format!("\n\t{}", path.display()));
        }
        out
    }

    pub fn job_progress(&self, status: JobStatus, progress: &JobProgress) -> String {
        self.info(&format!("      Test job {}: {} tests", status, progress))
    }

    /// Banner opening the final report.
    pub fn report_header(&self) -> String {
        format!("\n{}\n{}", self.paint("FINAL DIAGNOSTIC REPORT", Tone::Strong), self.rule())
    }

    pub fn verdict(&self, success: bool) -> String {
        if success {
            self.paint("Verification Successful!", Tone::Success)
        } else {
            self.paint("Verification Failed.", Tone::Error)
        }
    }
}

impl Default for DiagnosticsFormatter {
    fn default() -> Self {
        Self::plain()
    }
}
