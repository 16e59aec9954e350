//! User-facing output: verbosity-gated human text, or a single JSON / JUnit
//! document at the end of the run.

use crate::error::HarnessError;
use crate::model::{TestCase, Verbosity};
use crate::runner::CaseResult;
use crate::score::{Score, Tier};
use std::fmt::Write as _;
use std::io::{self, IsTerminal, Write};
use std::time::{Duration, Instant};
use tracing::warn;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Sink for everything the runner wants the user to see.
pub trait Reporter {
    /// Progress or diagnostic text, visible at `level` and above.
    fn message(&mut self, level: Verbosity, text: &str);
    fn test_started(&mut self, index: usize, case: &TestCase);
    fn test_finished(&mut self, result: &CaseResult);
    /// The run stopped early after a failed test.
    fn aborted(&mut self);
    /// Final score. Called once, whenever any test ran.
    fn summary(&mut self, score: &Score);
}

/// Plain-text reporter for terminals and logs.
pub struct HumanReporter<W: Write> {
    out: W,
    verbosity: Verbosity,
    color: bool,
}

impl HumanReporter<io::Stdout> {
    /// Report to stdout, colored when stdout is a terminal.
    pub fn stdout(verbosity: Verbosity) -> Self {
        let color = io::stdout().is_terminal();
        Self::new(io::stdout(), verbosity, color)
    }
}

impl<W: Write> HumanReporter<W> {
    pub fn new(out: W, verbosity: Verbosity, color: bool) -> Self {
        Self {
            out,
            verbosity,
            color,
        }
    }

    fn visible(&self, level: Verbosity) -> bool {
        self.verbosity != Verbosity::Silent && level <= self.verbosity
    }

    fn colored(&self, color: &str, text: &str) -> String {
        if self.color {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{text}") {
            warn!(error = %e, "failed to write report");
        }
    }
}

impl<W: Write> Reporter for HumanReporter<W> {
    fn message(&mut self, level: Verbosity, text: &str) {
        if self.visible(level) {
            self.emit(text);
        }
    }

    fn test_started(&mut self, index: usize, case: &TestCase) {
        if self.visible(Verbosity::Verbose) {
            self.emit(&format!("\n[{}] {}", index + 1, case.name));
        }
    }

    fn test_finished(&mut self, result: &CaseResult) {
        if !self.visible(Verbosity::Normal) {
            return;
        }
        if result.passed {
            let mark = self.colored(GREEN, "✓");
            self.emit(&format!("  {mark} {} ({:.2?})", result.name, result.duration));
        } else {
            let mark = self.colored(RED, "✗");
            self.emit(&format!("  {mark} {} ({:.2?})", result.name, result.duration));
            for failure in &result.failures {
                self.emit(&indent(failure, "    "));
            }
        }
    }

    fn aborted(&mut self) {
        let text = self.colored(RED, "A test failed. Stopping testing.");
        self.emit(&format!("\n{text}"));
    }

    fn summary(&mut self, score: &Score) {
        let color = match score.tier() {
            Tier::Success => GREEN,
            Tier::Warning => YELLOW,
            Tier::Failure => RED,
        };
        let line = self.colored(color, &score.to_string());
        self.emit(&format!("\n{line}"));
    }
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Machine-readable document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    Json,
    Junit,
}

/// Collects results silently and writes one document at [`Reporter::summary`].
pub struct StructuredReporter<W: Write> {
    out: W,
    document: Document,
    results: Vec<CaseResult>,
    aborted: bool,
    started: Instant,
}

impl<W: Write> StructuredReporter<W> {
    pub fn new(out: W, document: Document) -> Self {
        Self {
            out,
            document,
            results: Vec::new(),
            aborted: false,
            started: Instant::now(),
        }
    }

    fn render(&self, score: &Score) -> String {
        match self.document {
            Document::Json => {
                let doc = serde_json::json!({
                    "passed": score.passed,
                    "total": score.total,
                    "percent": score.percent(),
                    "tier": score.tier(),
                    "aborted": self.aborted,
                    "tests": self.results,
                });
                match serde_json::to_string_pretty(&doc) {
                    Ok(json) => json + "\n",
                    Err(e) => {
                        warn!(error = %e, "failed to serialize results");
                        String::new()
                    }
                }
            }
            Document::Junit => {
                let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
                format_junit_xml(&self.results, self.started.elapsed(), &timestamp)
            }
        }
    }
}

impl<W: Write> Reporter for StructuredReporter<W> {
    fn message(&mut self, _level: Verbosity, _text: &str) {}

    fn test_started(&mut self, _index: usize, _case: &TestCase) {}

    fn test_finished(&mut self, result: &CaseResult) {
        self.results.push(result.clone());
    }

    fn aborted(&mut self) {
        self.aborted = true;
    }

    fn summary(&mut self, score: &Score) {
        let rendered = self.render(score);
        if let Err(e) = self.out.write_all(rendered.as_bytes()) {
            warn!(error = %e, "failed to write report");
        }
    }
}

/// Print a fatal error to stderr. Captured command output is shown from the
/// normal tier up.
pub fn report_fatal(error: &HarnessError, verbosity: Verbosity) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "{error}");
    if verbosity >= Verbosity::Normal
        && let Some(output) = error.captured_output()
        && !output.is_empty()
    {
        let _ = writeln!(stderr, "{}", output.trim_end());
    }
}

/// Format results as a JUnit XML document with a single test suite.
fn format_junit_xml(results: &[CaseResult], total_time: Duration, timestamp: &str) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let tests = results.len();
    let failures = results.iter().filter(|t| !t.passed).count();

    let _ = writeln!(
        xml,
        "<testsuites tests=\"{tests}\" failures=\"{failures}\" time=\"{:.3}\">",
        total_time.as_secs_f64()
    );
    let _ = writeln!(
        xml,
        "  <testsuite name=\"fixture-runner\" tests=\"{tests}\" failures=\"{failures}\" time=\"{:.3}\" timestamp=\"{timestamp}\">",
        total_time.as_secs_f64()
    );

    for test in results {
        let _ = writeln!(
            xml,
            "    <testcase name=\"{}\" time=\"{:.3}\">",
            escape_xml(&test.name),
            test.duration.as_secs_f64()
        );

        if !test.passed {
            let message = test
                .failures
                .first()
                .and_then(|s| s.lines().next())
                .unwrap_or("Test failed");
            let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(message));
            for failure in &test.failures {
                let _ = writeln!(xml, "{}", escape_xml(failure));
            }
            xml.push_str("      </failure>\n");
        }

        xml.push_str("    </testcase>\n");
    }

    xml.push_str("  </testsuite>\n");
    xml.push_str("</testsuites>\n");
    xml
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
