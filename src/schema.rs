//! Schema definitions for the harness configuration file.
//!
//! These types mirror `testconfig.json` (or its YAML/TOML equivalents) as it is
//! written by users. Nothing here is validated; see [`crate::loader`] for the
//! conversion into the typed [`crate::model::Suite`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root document of a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConfigFile {
    /// Commands run once, in order, before any test.
    #[serde(default)]
    pub build: Option<Vec<String>>,

    /// Commands run before every test, ahead of the test's own `before_cmds`.
    #[serde(default)]
    pub setup: Option<Vec<String>>,

    /// Default command under test. Required when `tests` is absent.
    #[serde(default)]
    pub run: Option<String>,

    /// Default wall-clock limit in seconds for each test's main command.
    #[serde(default, alias = "runTimeout")]
    pub run_timeout: Option<f64>,

    /// File the program under test is expected to produce (fixture discovery mode).
    #[serde(default, alias = "checkFile")]
    pub check_file: Option<PathBuf>,

    /// Use `100 - percent` as the process exit code.
    #[serde(default, alias = "scoreExitCode")]
    pub score_exit_code: bool,

    /// Verbosity tier: 0 = silent, 1 = normal, 2 = verbose, 3 = debug.
    #[serde(default)]
    pub verbose: Option<u8>,

    /// Force the debug tier regardless of `verbose`.
    #[serde(default)]
    pub debug: bool,

    /// Stop running tests after the first failure.
    #[serde(default, alias = "firstFailureExit")]
    pub first_failure_exit: bool,

    /// Archive mismatched output files as `<expected>.badfile` at every verbosity.
    #[serde(default, alias = "keepBadFiles")]
    pub keep_bad_files: bool,

    /// Directory scanned for `test<i>.*` fixtures when `tests` is absent (default: `tests`).
    #[serde(default, alias = "fixtureDir")]
    pub fixture_dir: Option<PathBuf>,

    /// Explicitly declared test cases. When absent, tests are discovered from fixtures.
    #[serde(default)]
    pub tests: Option<Vec<TestEntry>>,
}

/// A single declared test case.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TestEntry {
    /// Display name (defaults to `Test <n>`).
    #[serde(default)]
    pub name: Option<String>,

    /// Command under test (defaults to the top-level `run`).
    #[serde(default, alias = "run")]
    pub run_cmd: Option<String>,

    /// Wall-clock limit in seconds (defaults to the top-level `run_timeout`).
    #[serde(default, alias = "runTimeout")]
    pub run_timeout: Option<f64>,

    /// Commands run before the main command. A failure aborts the whole run.
    #[serde(default, alias = "beforeCmds")]
    pub before_cmds: Option<Vec<String>>,

    /// Commands run after the main command. A failure fails the test.
    #[serde(default, alias = "afterCmds")]
    pub after_cmds: Option<Vec<String>>,

    /// File whose bytes are fed to the program's stdin.
    #[serde(default, alias = "stdinFile")]
    pub stdin_file: Option<PathBuf>,

    /// File holding the expected stdout bytes.
    #[serde(default, alias = "stdoutFile")]
    pub stdout_file: Option<PathBuf>,

    /// File holding the expected stderr bytes.
    #[serde(default, alias = "stderrFile")]
    pub stderr_file: Option<PathBuf>,

    /// Output files to compare after the program finishes.
    #[serde(default)]
    pub files: Option<Vec<FilePair>>,

    /// Require the program to exit with a non-zero status.
    #[serde(default, alias = "expectError")]
    pub expect_error: bool,
}

/// A produced file and the fixture it must match.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FilePair {
    /// Path the program under test writes.
    #[serde(alias = "programFile")]
    pub program_file: PathBuf,

    /// Fixture holding the expected contents.
    #[serde(alias = "checkFile")]
    pub check_file: PathBuf,
}

/// Generate the JSON Schema for configuration files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(ConfigFile)
}
