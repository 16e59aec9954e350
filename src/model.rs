//! Validated, strongly typed view of a test suite.
//!
//! Everything here is built once by [`crate::loader`] and never mutated while
//! the suite runs.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// How much diagnostic output the reporter emits. Each tier includes the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Silent,
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    /// Map the numeric `verbose` config value onto a tier.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Verbosity::Silent),
            1 => Some(Verbosity::Normal),
            2 => Some(Verbosity::Verbose),
            3 => Some(Verbosity::Debug),
            _ => None,
        }
    }
}

/// A produced file and the fixture it must match byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFileCheck {
    pub produced: PathBuf,
    pub expected: PathBuf,
}

/// One test case.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub run_command: String,
    pub stdin_fixture: Option<PathBuf>,
    pub expected_stdout: Option<PathBuf>,
    pub expected_stderr: Option<PathBuf>,
    pub output_file_checks: Vec<OutputFileCheck>,
    pub before_commands: Vec<String>,
    pub after_commands: Vec<String>,
    pub timeout: Option<Duration>,
    pub expect_error: bool,
}

impl TestCase {
    /// A case with only a run command; everything else unset.
    pub fn new(name: impl Into<String>, run_command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_command: run_command.into(),
            stdin_fixture: None,
            expected_stdout: None,
            expected_stderr: None,
            output_file_checks: Vec::new(),
            before_commands: Vec::new(),
            after_commands: Vec::new(),
            timeout: None,
            expect_error: false,
        }
    }

    /// Whether any content check (stdout, stderr, output file) is configured.
    pub fn has_content_checks(&self) -> bool {
        self.expected_stdout.is_some()
            || self.expected_stderr.is_some()
            || !self.output_file_checks.is_empty()
    }
}

/// Control-flow and exit-code policy for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunPolicy {
    /// Stop after the first failed test.
    pub first_failure_exit: bool,
    /// Exit with `100 - percent` instead of 0/1.
    pub score_exit_code: bool,
    /// Archive mismatched output files regardless of verbosity.
    pub keep_bad_files: bool,
}

/// A fully validated suite, ready to run.
#[derive(Debug, Clone)]
pub struct Suite {
    pub build_commands: Vec<String>,
    pub cases: Vec<TestCase>,
    pub verbosity: Verbosity,
    pub policy: RunPolicy,
    /// Directory every command runs in; relative fixture paths were resolved against it.
    pub working_dir: PathBuf,
}

impl Suite {
    /// Whether mismatched output files should be archived next to their fixture.
    pub fn archive_mismatches(&self) -> bool {
        self.policy.keep_bad_files || self.verbosity >= Verbosity::Verbose
    }
}

/// Convert a validated, positive number of seconds into a [`Duration`],
/// rounded to the nearest millisecond and never below one.
pub fn timeout_from_secs(secs: f64) -> Duration {
    Duration::from_millis(((secs * 1000.0).round() as u64).max(1))
}
