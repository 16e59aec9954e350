//! Test execution engine.
//!
//! Runs the build phase, then every test case strictly in declared order:
//! before-commands, the command under test, the exit-status policy, content
//! checks, after-commands. Results are aggregated into a [`Score`].

use crate::compare::{self, Comparison, FileOutcome};
use crate::error::{ConfigError, HarnessError};
use crate::executor::{self, CommandSpec, ExecutionResult};
use crate::model::{OutputFileCheck, Suite, TestCase, Verbosity};
use crate::report::Reporter;
use crate::score::Score;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of running a single test case.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CaseResult {
    pub name: String,
    pub passed: bool,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    pub failures: Vec<String>,
}

/// Result of a run that reached the test phase.
#[derive(Debug)]
pub struct RunOutcome {
    pub results: Vec<CaseResult>,
    pub score: Score,
    /// Stopped early because of `first_failure_exit`.
    pub aborted: bool,
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Build, run every test case, and report the score.
///
/// Returns `Err` for anything that prevents a score: a failed build or
/// before-command, an unreadable stdin fixture, or a shell that cannot spawn.
pub fn run_suite(suite: &Suite, reporter: &mut dyn Reporter) -> Result<RunOutcome, HarnessError> {
    run_build(suite, reporter)?;

    reporter.message(Verbosity::Normal, "Running tests...");
    let mut score = Score::default();
    let mut results = Vec::with_capacity(suite.cases.len());
    let mut aborted = false;

    for (index, case) in suite.cases.iter().enumerate() {
        reporter.test_started(index, case);
        let result = run_case(case, suite, reporter)?;
        score.record(result.passed);
        reporter.test_finished(&result);

        let failed = !result.passed;
        results.push(result);
        if failed && suite.policy.first_failure_exit {
            debug!(test = %case.name, "stopping after first failure");
            aborted = true;
            break;
        }
    }

    if aborted {
        reporter.aborted();
    }
    reporter.summary(&score);

    Ok(RunOutcome {
        results,
        score,
        aborted,
    })
}

/// Run every build command in order. Any unsuccessful command is fatal.
pub fn run_build(suite: &Suite, reporter: &mut dyn Reporter) -> Result<(), HarnessError> {
    if suite.build_commands.is_empty() {
        return Ok(());
    }

    reporter.message(Verbosity::Normal, "Building your program...");
    for command in &suite.build_commands {
        let result = run_hook(command, suite, reporter)?;
        if !result.succeeded() {
            return Err(HarnessError::Build {
                command: command.clone(),
                output: result.combined_output(),
            });
        }
    }
    reporter.message(Verbosity::Normal, "Build complete.");
    Ok(())
}

/// Run one build/before/after command without a timeout.
fn run_hook(
    command: &str,
    suite: &Suite,
    reporter: &mut dyn Reporter,
) -> Result<ExecutionResult, HarnessError> {
    reporter.message(Verbosity::Verbose, command);
    let spec = CommandSpec::new(command).with_cwd(&suite.working_dir);
    let result = executor::execute(&spec).map_err(|source| HarnessError::Spawn {
        command: command.to_string(),
        source,
    })?;
    report_status(command, &result, reporter);
    Ok(result)
}

fn report_status(command: &str, result: &ExecutionResult, reporter: &mut dyn Reporter) {
    reporter.message(
        Verbosity::Debug,
        &format!(
            "\"{command}\" {} in {:.2?}",
            result.describe_status(),
            result.duration
        ),
    );
}

fn run_case(
    case: &TestCase,
    suite: &Suite,
    reporter: &mut dyn Reporter,
) -> Result<CaseResult, HarnessError> {
    let start = Instant::now();
    let mut failures = Vec::new();

    if case.expect_error {
        reporter.message(Verbosity::Verbose, "Expecting an error from this test.");
    }

    for command in &case.before_commands {
        let result = run_hook(command, suite, reporter)?;
        if !result.succeeded() {
            return Err(HarnessError::Setup {
                command: command.clone(),
                output: result.combined_output(),
            });
        }
    }

    let stdin = case
        .stdin_fixture
        .as_deref()
        .map(|path| {
            std::fs::read(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        })
        .transpose()?;

    reporter.message(Verbosity::Verbose, &case.run_command);
    let spec = CommandSpec::new(&case.run_command)
        .with_stdin(stdin)
        .with_timeout(case.timeout)
        .with_cwd(&suite.working_dir);
    let result = executor::execute(&spec).map_err(|source| HarnessError::Spawn {
        command: case.run_command.clone(),
        source,
    })?;
    report_status(&case.run_command, &result, reporter);

    // A broken exit-status expectation ends the test before any content check.
    if let Some(reason) = exit_policy_failure(case, &result) {
        failures.push(reason);
        return Ok(finish(case, start, failures));
    }

    if !case.has_content_checks() {
        debug!(test = %case.name, "no content checks, passing on exit status");
    }
    if let Some(expected) = &case.expected_stdout {
        reporter.message(Verbosity::Verbose, "Checking stdout...");
        failures.extend(check_stream("stdout", &result.stdout, expected));
    }
    if let Some(expected) = &case.expected_stderr {
        reporter.message(Verbosity::Verbose, "Checking stderr...");
        failures.extend(check_stream("stderr", &result.stderr, expected));
    }
    for check in &case.output_file_checks {
        reporter.message(
            Verbosity::Verbose,
            &format!("Checking file \"{}\"...", check.produced.display()),
        );
        failures.extend(check_output_file(check, suite.archive_mismatches()));
    }

    for command in &case.after_commands {
        let result = run_hook(command, suite, reporter)?;
        if !result.succeeded() {
            failures.push(format!(
                "Command \"{command}\" failed ({}).\n{}",
                result.describe_status(),
                result.combined_output()
            ));
            break;
        }
    }

    Ok(finish(case, start, failures))
}

fn finish(case: &TestCase, start: Instant, failures: Vec<String>) -> CaseResult {
    CaseResult {
        name: case.name.clone(),
        passed: failures.is_empty(),
        duration: start.elapsed(),
        failures,
    }
}

/// Apply the exit-status policy. `Some(reason)` means the test has failed.
fn exit_policy_failure(case: &TestCase, result: &ExecutionResult) -> Option<String> {
    if result.was_killed() {
        if result.timed_out {
            let limit = case.timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
            return Some(format!(
                "Your program was killed for exceeding the {limit}s timeout."
            ));
        }
        let signal = result.signal.map(executor::signal_name).unwrap_or_default();
        return Some(format!("Your program was killed with signal {signal}."));
    }
    match (result.exit_status, case.expect_error) {
        (Some(0), true) => Some(format!(
            "This test was expecting an error, but your program finished normally:\n{}",
            result.combined_output()
        )),
        (Some(0), false) | (Some(_), true) => None,
        (code, false) => Some(format!(
            "Your program ran into an error ({}):\n{}",
            code.map(|c| format!("exit status {c}"))
                .unwrap_or_else(|| "unknown status".to_string()),
            result.combined_output()
        )),
        (None, true) => None,
    }
}

fn check_stream(stream: &str, actual: &[u8], expected: &Path) -> Option<String> {
    match compare::compare(actual, expected) {
        Comparison::Match => None,
        Comparison::Mismatch { expected } => Some(format!(
            "Your program's {stream} did not match the expected {stream}{}.\nYour {stream}:\n{}\nExpected {stream}:\n{}",
            difference_note(actual, &expected),
            String::from_utf8_lossy(actual),
            String::from_utf8_lossy(&expected),
        )),
        Comparison::ExpectedUnreadable(e) => Some(format!(
            "Expected {stream} fixture \"{}\" could not be read: {e}",
            expected.display()
        )),
    }
}

fn check_output_file(check: &OutputFileCheck, archive: bool) -> Option<String> {
    let produced = check.produced.display();
    let expected = check.expected.display();
    match compare::check_output_file(check) {
        FileOutcome::Match => None,
        FileOutcome::Missing => Some(format!(
            "The file \"{produced}\" does not exist. Your program should create it with the contents of \"{expected}\"."
        )),
        FileOutcome::Unreadable(e) => Some(format!(
            "The file \"{produced}\" could not be read: {e}"
        )),
        FileOutcome::ExpectedUnreadable(e) => Some(format!(
            "Expected file \"{expected}\" could not be read: {e}"
        )),
        FileOutcome::Mismatch { actual, expected: want } => {
            let mut message = format!(
                "The contents of file \"{produced}\" and \"{expected}\" do not match{}.",
                difference_note(&actual, &want)
            );
            if archive {
                match compare::archive_mismatch(&check.expected, &actual) {
                    Ok(path) => {
                        message.push_str(&format!(
                            " Your output was saved to \"{}\".",
                            path.display()
                        ));
                    }
                    Err(e) => warn!(error = %e, "failed to archive mismatched output"),
                }
            }
            Some(message)
        }
    }
}

fn difference_note(actual: &[u8], expected: &[u8]) -> String {
    compare::first_difference(actual, expected)
        .map(|offset| format!(" (first difference at byte {offset})"))
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::{RunPolicy, Suite};
    use crate::score::Tier;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};

    /// Reporter that records everything it is told.
    #[derive(Default)]
    struct Recorder {
        messages: Vec<String>,
        started: Vec<String>,
        finished: Vec<(String, bool)>,
        aborted: bool,
        summary: Option<Score>,
    }

    impl Reporter for Recorder {
        fn message(&mut self, _level: Verbosity, text: &str) {
            self.messages.push(text.to_string());
        }

        fn test_started(&mut self, _index: usize, case: &TestCase) {
            self.started.push(case.name.clone());
        }

        fn test_finished(&mut self, result: &CaseResult) {
            self.finished.push((result.name.clone(), result.passed));
        }

        fn aborted(&mut self) {
            self.aborted = true;
        }

        fn summary(&mut self, score: &Score) {
            self.summary = Some(*score);
        }
    }

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self { dir: tempdir().unwrap() }
        }

        fn file(&self, name: &str, contents: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn suite(&self, cases: Vec<TestCase>) -> Suite {
            Suite {
                build_commands: vec![],
                cases,
                verbosity: Verbosity::Normal,
                policy: RunPolicy::default(),
                working_dir: self.dir.path().to_path_buf(),
            }
        }
    }

    fn run(suite: &Suite) -> (RunOutcome, Recorder) {
        let mut recorder = Recorder::default();
        let outcome = run_suite(suite, &mut recorder).unwrap();
        (outcome, recorder)
    }

    fn case(name: &str, command: &str) -> TestCase {
        TestCase::new(name, command)
    }

    // ==================== Scenarios ====================

    #[test]
    fn build_then_cat_with_fixtures_passes() {
        let fx = Fixture::new();
        let mut c = case("echo back", "cat");
        c.stdin_fixture = Some(fx.file("in.txt", b"hi"));
        c.expected_stdout = Some(fx.file("out.txt", b"hi"));
        let mut suite = fx.suite(vec![c]);
        suite.build_commands = vec!["echo ok".to_string()];

        let (outcome, recorder) = run(&suite);
        assert_eq!(outcome.score, Score::new(1, 1));
        assert_eq!(outcome.score.percent(), 100);
        assert_eq!(outcome.score.tier(), Tier::Success);
        assert_eq!(outcome.score.exit_code(&suite.policy), 0);
        assert!(!outcome.aborted);
        assert!(recorder.messages.contains(&"Build complete.".to_string()));
        assert_eq!(recorder.summary, Some(Score::new(1, 1)));
    }

    #[test]
    fn score_exit_code_with_two_of_three() {
        let fx = Fixture::new();
        let mut suite = fx.suite(vec![case("a", "true"), case("b", "false"), case("c", "true")]);
        suite.policy.score_exit_code = true;

        let (outcome, _) = run(&suite);
        assert_eq!(outcome.score, Score::new(2, 3));
        assert_eq!(outcome.score.percent(), 67);
        assert_eq!(outcome.score.exit_code(&suite.policy), 33);
    }

    #[test]
    fn first_failure_exit_stops_enumeration() {
        let fx = Fixture::new();
        let mut suite = fx.suite(vec![
            case("pass", "true"),
            case("fail", "false"),
            case("never", "touch third_ran"),
        ]);
        suite.policy.first_failure_exit = true;

        let (outcome, recorder) = run(&suite);
        assert_eq!(outcome.score, Score::new(1, 2));
        assert!(outcome.aborted);
        assert!(recorder.aborted);
        assert_eq!(recorder.started, vec!["pass", "fail"]);
        assert!(!fx.path("third_ran").exists());
        assert_eq!(outcome.score.exit_code(&suite.policy), 1);
    }

    #[test]
    fn without_first_failure_exit_all_tests_run() {
        let fx = Fixture::new();
        let suite = fx.suite(vec![
            case("fail", "false"),
            case("runs anyway", "touch ran"),
        ]);
        let (outcome, _) = run(&suite);
        assert_eq!(outcome.score, Score::new(1, 2));
        assert!(fx.path("ran").exists());
    }

    // ==================== Exit-Status Policy ====================

    #[test]
    fn no_content_checks_passes_on_exit_status() {
        let fx = Fixture::new();
        let (outcome, _) = run(&fx.suite(vec![case("quiet", "echo anything")]));
        assert!(outcome.results[0].passed);
    }

    #[test]
    fn nonzero_exit_fails_with_captured_output() {
        let fx = Fixture::new();
        let (outcome, _) = run(&fx.suite(vec![case("crash", "echo partial; echo oops >&2; exit 2")]));
        let result = &outcome.results[0];
        assert!(!result.passed);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].contains("exit status 2"));
        assert!(result.failures[0].contains("partial\noops\n"));
    }

    #[test]
    fn expected_error_that_does_not_happen_fails() {
        let fx = Fixture::new();
        let mut c = case("should fail", "echo fine");
        c.expect_error = true;
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert!(!outcome.results[0].passed);
        assert!(outcome.results[0].failures[0].contains("expecting an error"));
    }

    #[test]
    fn expected_error_proceeds_to_content_checks() {
        let fx = Fixture::new();
        let mut good = case("usage error", "echo 'usage: prog' >&2; exit 1");
        good.expect_error = true;
        good.expected_stderr = Some(fx.file("usage.err", b"usage: prog\n"));
        let mut bad = case("wrong message", "echo 'bad' >&2; exit 1");
        bad.expect_error = true;
        bad.expected_stderr = Some(fx.path("usage.err"));

        let (outcome, _) = run(&fx.suite(vec![good, bad]));
        assert!(outcome.results[0].passed, "{:?}", outcome.results[0].failures);
        assert!(!outcome.results[1].passed);
        assert!(outcome.results[1].failures[0].contains("stderr did not match"));
    }

    #[test]
    fn timeout_is_a_failure_not_a_hang() {
        let fx = Fixture::new();
        let mut c = case("slow", "sleep 10");
        c.timeout = Some(Duration::from_millis(300));
        let start = Instant::now();
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!outcome.results[0].passed);
        assert!(outcome.results[0].failures[0].contains("timeout"));
    }

    #[test]
    fn background_child_keeping_output_open_times_out() {
        let fx = Fixture::new();
        let mut c = case("leaves a child behind", "sleep 6 & echo hi");
        c.timeout = Some(Duration::from_millis(500));
        let start = Instant::now();
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(!outcome.results[0].passed);
        assert!(outcome.results[0].failures[0].contains("timeout"));
    }

    #[test]
    fn signal_is_reported_distinctly_from_timeout() {
        let fx = Fixture::new();
        let (outcome, _) = run(&fx.suite(vec![case("segv", "kill -9 $$")]));
        let failure = &outcome.results[0].failures[0];
        assert!(failure.contains("signal SIGKILL"));
        assert!(!failure.contains("timeout"));
    }

    #[test]
    fn killed_process_fails_even_when_expecting_error() {
        let fx = Fixture::new();
        let mut c = case("killed", "kill -9 $$");
        c.expect_error = true;
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert!(!outcome.results[0].passed);
    }

    // ==================== Content Checks ====================

    #[test]
    fn all_configured_checks_are_evaluated() {
        let fx = Fixture::new();
        let mut c = case("both wrong", "echo out; echo err >&2");
        c.expected_stdout = Some(fx.file("o", b"OUT\n"));
        c.expected_stderr = Some(fx.file("e", b"ERR\n"));
        let (outcome, _) = run(&fx.suite(vec![c]));
        let failures = &outcome.results[0].failures;
        assert_eq!(failures.len(), 2);
        assert!(failures[0].contains("stdout"));
        assert!(failures[1].contains("stderr"));
    }

    #[test]
    fn stdout_mismatch_notes_first_difference() {
        let fx = Fixture::new();
        let mut c = case("off by one", "printf 'abc'");
        c.expected_stdout = Some(fx.file("o", b"abd"));
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert!(outcome.results[0].failures[0].contains("first difference at byte 2"));
    }

    #[test]
    fn output_file_matches() {
        let fx = Fixture::new();
        let mut c = case("writes file", "printf '42' > result.txt");
        c.output_file_checks.push(OutputFileCheck {
            produced: fx.path("result.txt"),
            expected: fx.file("expected.txt", b"42"),
        });
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert!(outcome.results[0].passed, "{:?}", outcome.results[0].failures);
    }

    #[test]
    fn missing_output_file_is_a_failure_not_a_crash() {
        let fx = Fixture::new();
        let mut c = case("forgets file", "true");
        c.output_file_checks.push(OutputFileCheck {
            produced: fx.path("result.txt"),
            expected: fx.file("expected.txt", b"42"),
        });
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert!(!outcome.results[0].passed);
        assert!(outcome.results[0].failures[0].contains("does not exist"));
    }

    #[test]
    fn mismatched_output_file_is_archived_when_enabled() {
        let fx = Fixture::new();
        let mut c = case("wrong file", "printf '41' > result.txt");
        c.output_file_checks.push(OutputFileCheck {
            produced: fx.path("result.txt"),
            expected: fx.file("expected.txt", b"42"),
        });

        let suite = fx.suite(vec![c.clone()]);
        let (outcome, _) = run(&suite);
        assert!(!outcome.results[0].passed);
        assert!(!fx.path("expected.txt.badfile").exists());

        let mut suite = fx.suite(vec![c]);
        suite.verbosity = Verbosity::Verbose;
        let (outcome, _) = run(&suite);
        assert!(outcome.results[0].failures[0].contains("expected.txt.badfile"));
        assert_eq!(std::fs::read(fx.path("expected.txt.badfile")).unwrap(), b"41");
    }

    // ==================== Hooks ====================

    #[test]
    fn before_commands_run_in_order_before_the_test() {
        let fx = Fixture::new();
        let mut c = case("reads setup", "cat log");
        c.before_commands = vec!["echo one > log".to_string(), "echo two >> log".to_string()];
        c.expected_stdout = Some(fx.file("expected", b"one\ntwo\n"));
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert!(outcome.results[0].passed, "{:?}", outcome.results[0].failures);
    }

    #[test]
    fn failing_before_command_aborts_the_run() {
        let fx = Fixture::new();
        let mut first = case("setup breaks", "true");
        first.before_commands = vec!["echo broken; exit 1".to_string()];
        let suite = fx.suite(vec![first, case("never", "touch ran")]);

        let mut recorder = Recorder::default();
        let err = run_suite(&suite, &mut recorder).unwrap_err();
        match &err {
            HarnessError::Setup { command, output } => {
                assert_eq!(command, "echo broken; exit 1");
                assert_eq!(output, "broken\n");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fx.path("ran").exists());
        assert!(recorder.summary.is_none());
    }

    #[test]
    fn failing_after_command_fails_test_but_run_continues() {
        let fx = Fixture::new();
        let mut first = case("teardown breaks", "true");
        first.after_commands = vec!["exit 4".to_string(), "touch skipped".to_string()];
        let suite = fx.suite(vec![first, case("second", "true")]);

        let (outcome, _) = run(&suite);
        assert!(!outcome.results[0].passed);
        assert!(outcome.results[0].failures[0].contains("\"exit 4\" failed"));
        assert!(outcome.results[1].passed);
        assert!(!fx.path("skipped").exists());
    }

    #[test]
    fn after_command_failure_combines_with_content_failure() {
        let fx = Fixture::new();
        let mut c = case("both", "echo wrong");
        c.expected_stdout = Some(fx.file("o", b"right\n"));
        c.after_commands = vec!["false".to_string()];
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert_eq!(outcome.results[0].failures.len(), 2);
    }

    #[test]
    fn after_commands_skipped_when_exit_policy_fails() {
        let fx = Fixture::new();
        let mut c = case("crash", "exit 1");
        c.after_commands = vec!["touch cleaned".to_string()];
        let (outcome, _) = run(&fx.suite(vec![c]));
        assert!(!outcome.results[0].passed);
        assert!(!fx.path("cleaned").exists());
    }

    // ==================== Build Phase ====================

    #[test]
    fn failing_build_is_fatal() {
        let fx = Fixture::new();
        let mut suite = fx.suite(vec![case("never", "touch ran")]);
        suite.build_commands = vec![
            "echo step1 > built".to_string(),
            "echo 'cc: error' >&2; exit 1".to_string(),
            "touch step3".to_string(),
        ];

        let mut recorder = Recorder::default();
        let err = run_suite(&suite, &mut recorder).unwrap_err();
        assert!(matches!(err, HarnessError::Build { .. }));
        assert_eq!(err.captured_output(), Some("cc: error\n"));
        assert!(fx.path("built").exists());
        assert!(!fx.path("step3").exists());
        assert!(!fx.path("ran").exists());
        assert!(recorder.started.is_empty());
    }

    #[test]
    fn tests_share_the_filesystem_in_order() {
        let fx = Fixture::new();
        let mut reader = case("reads", "cat shared.txt");
        reader.expected_stdout = Some(fx.file("expected", b"from first\n"));
        let suite = fx.suite(vec![case("writes", "echo 'from first' > shared.txt"), reader]);
        let (outcome, recorder) = run(&suite);
        assert_eq!(outcome.score, Score::new(2, 2));
        assert_eq!(
            recorder.finished,
            vec![("writes".to_string(), true), ("reads".to_string(), true)]
        );
    }

    #[test]
    fn unreadable_stdin_fixture_is_fatal() {
        let fx = Fixture::new();
        let mut c = case("stdin gone", "cat");
        c.stdin_fixture = Some(fx.path("deleted.txt"));
        let mut recorder = Recorder::default();
        let err = run_suite(&fx.suite(vec![c]), &mut recorder).unwrap_err();
        assert!(matches!(err, HarnessError::Config(ConfigError::Io { .. })));
    }
}
