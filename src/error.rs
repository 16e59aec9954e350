//! Error types for configuration loading and suite execution.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code used for every error that prevents a score from being produced.
pub const FATAL_EXIT_CODE: i32 = 128;

/// Errors raised while locating, parsing or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file was found in any of the searched locations.
    #[error(
        "no configuration file found (looked for {}).\nEnsure the file exists with the correct name in the current directory.",
        join_paths(.searched)
    )]
    NotFound { searched: Vec<PathBuf> },

    /// Failed to read a file.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse JSON.
    #[error("{} could not be read due to a JSON syntax error: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Failed to parse YAML.
    #[error("{} could not be read due to a YAML syntax error: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Failed to parse TOML.
    #[error("{} could not be read due to a TOML syntax error: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Unsupported file extension.
    #[error("unsupported configuration format: {0} (expected .json, .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),

    /// A value in the configuration is missing or invalid.
    #[error("{0}")]
    Invalid(String),
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that abort a run before a score can be produced.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A build command exited unsuccessfully.
    #[error("An error occurred while building your program with \"{command}\".")]
    Build { command: String, output: String },

    /// A per-test before-command exited unsuccessfully.
    #[error("An error occurred while running command \"{command}\".")]
    Setup { command: String, output: String },

    /// The shell could not be started at all.
    #[error("failed to spawn \"{command}\": {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    /// Captured output of the failing command, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            HarnessError::Build { output, .. } | HarnessError::Setup { output, .. } => {
                Some(output.as_str())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_searched_paths() {
        let err = ConfigError::NotFound {
            searched: vec![PathBuf::from("testconfig.json"), PathBuf::from("tests/testconfig.json")],
        };
        let msg = err.to_string();
        assert!(msg.contains("testconfig.json, tests/testconfig.json"));
    }

    #[test]
    fn build_error_exposes_output() {
        let err = HarnessError::Build {
            command: "make".to_string(),
            output: "cc: not found".to_string(),
        };
        assert_eq!(err.captured_output(), Some("cc: not found"));
        assert!(err.to_string().contains("\"make\""));
    }
}
