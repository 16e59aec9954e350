//! Configuration loader.
//!
//! Finds and parses the configuration file, discovers `test<i>.*` fixtures
//! when no explicit test list is given, and validates everything into a
//! [`Suite`] before any command runs.

use crate::compare::BADFILE_SUFFIX;
use crate::error::ConfigError;
use crate::model::{OutputFileCheck, RunPolicy, Suite, TestCase, Verbosity, timeout_from_secs};
use crate::schema::{ConfigFile, TestEntry};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Config file names, in search order.
pub const CONFIG_FILENAMES: [&str; 4] = [
    "testconfig.json",
    "testconfig.yaml",
    "testconfig.yml",
    "testconfig.toml",
];

/// Secondary directory searched for a config file and default fixture directory.
pub const TESTS_DIR: &str = "tests";

const FIXTURE_PATTERN: &str = r"^test(\d+)\.(in\.txt|out\.txt|err\.txt|error|file.*)$";

/// Locate the config file in `dir`, then in `dir/tests`.
pub fn find_config(dir: &Path) -> Result<PathBuf, ConfigError> {
    let mut searched = Vec::new();
    for root in [dir.to_path_buf(), dir.join(TESTS_DIR)] {
        for name in CONFIG_FILENAMES {
            let candidate = root.join(name);
            if candidate.is_file() {
                debug!(path = %candidate.display(), "found configuration");
                return Ok(candidate);
            }
            searched.push(candidate);
        }
    }
    Err(ConfigError::NotFound { searched })
}

/// Parse a config file, choosing the format from its extension.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    match ext {
        "json" => serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        }),
        "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        }),
        "toml" => toml::from_str(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        }),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Find, parse and validate the suite rooted at `working_dir`.
///
/// `config_path` overrides the search. Relative fixture paths and the command
/// working directory both resolve against `working_dir`.
pub fn load_suite(
    config_path: Option<&Path>,
    working_dir: &Path,
) -> Result<(PathBuf, Suite), ConfigError> {
    let path = match config_path {
        Some(p) => resolve(working_dir, p),
        None => find_config(working_dir)?,
    };
    let config = load_config(&path)?;
    let suite = build_suite(config, working_dir)?;
    Ok((path, suite))
}

/// Suite-wide values each test case falls back to.
struct Defaults {
    run: Option<String>,
    setup: Vec<String>,
    timeout: Option<Duration>,
}

/// Validate a parsed config into a runnable [`Suite`].
pub fn build_suite(config: ConfigFile, working_dir: &Path) -> Result<Suite, ConfigError> {
    let verbosity = if config.debug {
        Verbosity::Debug
    } else {
        match config.verbose {
            None => Verbosity::default(),
            Some(level) => Verbosity::from_level(level).ok_or_else(|| {
                invalid(format!(
                    "The value of \"verbose\" is invalid ({level}); expected 0, 1, 2 or 3."
                ))
            })?,
        }
    };

    debug!("checking build commands");
    let build_commands = check_commands(config.build.as_deref(), "\"build\"")?;

    if let Some(run) = &config.run
        && run.trim().is_empty()
    {
        return Err(invalid("The value of \"run\" is invalid."));
    }

    let defaults = Defaults {
        run: config.run.clone(),
        setup: check_commands(config.setup.as_deref(), "\"setup\"")?,
        timeout: check_timeout(config.run_timeout, "\"run_timeout\"")?,
    };

    debug!("checking tests");
    let cases = match &config.tests {
        Some(entries) => {
            if entries.is_empty() {
                return Err(invalid("No tests specified."));
            }
            entries
                .iter()
                .enumerate()
                .map(|(i, entry)| build_case(i, entry, &defaults, working_dir))
                .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let fixture_dir = resolve(
                working_dir,
                config
                    .fixture_dir
                    .as_deref()
                    .unwrap_or_else(|| Path::new(TESTS_DIR)),
            );
            discover_cases(
                &fixture_dir,
                &defaults,
                config.check_file.as_deref(),
                working_dir,
            )?
        }
    };

    Ok(Suite {
        build_commands,
        cases,
        verbosity,
        policy: RunPolicy {
            first_failure_exit: config.first_failure_exit,
            score_exit_code: config.score_exit_code,
            keep_bad_files: config.keep_bad_files,
        },
        working_dir: working_dir.to_path_buf(),
    })
}

fn build_case(
    index: usize,
    entry: &TestEntry,
    defaults: &Defaults,
    working_dir: &Path,
) -> Result<TestCase, ConfigError> {
    let name = entry
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Test {}", index + 1));
    debug!(test = %name, "checking test");

    let run_command = entry
        .run_cmd
        .clone()
        .or_else(|| defaults.run.clone())
        .ok_or_else(|| invalid(format!("{name}: \"run_cmd\" attribute is missing.")))?;
    if run_command.trim().is_empty() {
        return Err(invalid(format!(
            "{name}: The value of \"run_cmd\" is invalid."
        )));
    }

    let timeout = match entry.run_timeout {
        Some(_) => check_timeout(entry.run_timeout, &format!("{name}: \"run_timeout\""))?,
        None => defaults.timeout,
    };

    let mut before_commands = defaults.setup.clone();
    before_commands.extend(check_commands(
        entry.before_cmds.as_deref(),
        &format!("{name}: \"before_cmds\""),
    )?);
    let after_commands = check_commands(
        entry.after_cmds.as_deref(),
        &format!("{name}: \"after_cmds\""),
    )?;

    let fixture = |path: &Option<PathBuf>, field: &str| {
        path.as_deref()
            .map(|p| check_fixture(working_dir, p, &format!("{name}: \"{field}\"")))
            .transpose()
    };
    let stdin_fixture = fixture(&entry.stdin_file, "stdin_file")?;
    let expected_stdout = fixture(&entry.stdout_file, "stdout_file")?;
    let expected_stderr = fixture(&entry.stderr_file, "stderr_file")?;

    let mut output_file_checks = Vec::new();
    for (f, pair) in entry.files.iter().flatten().enumerate() {
        let what = format!("{name}: \"files\"[{}]", f + 1);
        if pair.program_file.as_os_str().is_empty() {
            return Err(invalid(format!(
                "{what}: The value of \"program_file\" is invalid."
            )));
        }
        output_file_checks.push(OutputFileCheck {
            produced: resolve(working_dir, &pair.program_file),
            expected: check_fixture(working_dir, &pair.check_file, &format!("{what}: \"check_file\""))?,
        });
    }

    Ok(TestCase {
        name,
        run_command,
        stdin_fixture,
        expected_stdout,
        expected_stderr,
        output_file_checks,
        before_commands,
        after_commands,
        timeout,
        expect_error: entry.expect_error,
    })
}

/// Fixtures found for one discovered test index.
#[derive(Debug, Default)]
struct DiscoveredFixtures {
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    file: Option<PathBuf>,
    error_marker: bool,
}

/// Build test cases from `test<i>.*` fixtures in `dir`, ordered by index.
fn discover_cases(
    dir: &Path,
    defaults: &Defaults,
    check_file: Option<&Path>,
    working_dir: &Path,
) -> Result<Vec<TestCase>, ConfigError> {
    let run = defaults.run.clone().ok_or_else(|| {
        invalid("\"run\" attribute is missing (required when \"tests\" is not given).")
    })?;
    if !dir.is_dir() {
        return Err(invalid(format!(
            "Fixture directory \"{}\" does not exist.",
            dir.display()
        )));
    }

    let pattern = Regex::new(FIXTURE_PATTERN).map_err(|e| invalid(e.to_string()))?;
    let mut found: BTreeMap<u64, DiscoveredFixtures> = BTreeMap::new();

    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let path = entry
            .map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file() || file_name.ends_with(BADFILE_SUFFIX) {
            continue;
        }
        let Some(caps) = pattern.captures(file_name) else {
            continue;
        };
        let index: u64 = caps[1]
            .parse()
            .map_err(|_| invalid(format!("\"{file_name}\": test index is out of range.")))?;
        let slot = found.entry(index).or_default();
        let target = match &caps[2] {
            "in.txt" => &mut slot.stdin,
            "out.txt" => &mut slot.stdout,
            "err.txt" => &mut slot.stderr,
            "error" => {
                slot.error_marker = true;
                continue;
            }
            _ => &mut slot.file,
        };
        if let Some(existing) = target {
            return Err(invalid(format!(
                "test{index}: both \"{}\" and \"{file_name}\" define the same fixture.",
                existing.display()
            )));
        }
        *target = Some(path.clone());
    }

    if found.is_empty() {
        return Err(invalid(format!(
            "No tests found in \"{}\".",
            dir.display()
        )));
    }

    let produced = check_file.map(|p| resolve(working_dir, p));
    let mut cases = Vec::with_capacity(found.len());
    for (index, fixtures) in found {
        let name = format!("Test {index}");
        if fixtures.stdout.is_none()
            && fixtures.stderr.is_none()
            && fixtures.file.is_none()
            && !fixtures.error_marker
        {
            return Err(invalid(format!(
                "test{index}: no expected output (.out.txt, .err.txt, .file) or .error marker found."
            )));
        }

        let output_file_checks = match (fixtures.file, &produced) {
            (None, _) => Vec::new(),
            (Some(expected), Some(produced)) => vec![OutputFileCheck {
                produced: produced.clone(),
                expected,
            }],
            (Some(expected), None) => {
                return Err(invalid(format!(
                    "\"{}\" requires \"check_file\" to name the file your program writes.",
                    expected.display()
                )));
            }
        };

        cases.push(TestCase {
            stdin_fixture: fixtures.stdin,
            expected_stdout: fixtures.stdout,
            expected_stderr: fixtures.stderr,
            output_file_checks,
            before_commands: defaults.setup.clone(),
            timeout: defaults.timeout,
            expect_error: fixtures.error_marker,
            ..TestCase::new(name, run.clone())
        });
    }
    debug!(count = cases.len(), dir = %dir.display(), "discovered tests");
    Ok(cases)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Every command in `commands` must be a non-blank string.
fn check_commands(commands: Option<&[String]>, what: &str) -> Result<Vec<String>, ConfigError> {
    let commands = commands.unwrap_or_default();
    if commands.iter().any(|c| c.trim().is_empty()) {
        return Err(invalid(format!(
            "{what}: One or more commands are invalid."
        )));
    }
    Ok(commands.to_vec())
}

/// Timeouts must be finite and positive.
fn check_timeout(secs: Option<f64>, what: &str) -> Result<Option<Duration>, ConfigError> {
    match secs {
        None => Ok(None),
        Some(s) if s.is_finite() && s > 0.0 => Ok(Some(timeout_from_secs(s))),
        Some(_) => Err(invalid(format!(
            "The value of {what} is invalid. \nFix the value, or remove the attribute if you do not intend to use it."
        ))),
    }
}

/// A referenced fixture must exist and be a regular file.
fn check_fixture(working_dir: &Path, path: &Path, what: &str) -> Result<PathBuf, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(invalid(format!(
            "The value of {what} is invalid. \nFix the value, or remove the attribute if you do not intend to use it."
        )));
    }
    let resolved = resolve(working_dir, path);
    if !resolved.is_file() {
        return Err(invalid(format!(
            "{what}: File \"{}\" does not exist.",
            resolved.display()
        )));
    }
    Ok(resolved)
}
