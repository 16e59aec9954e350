//! Byte-exact comparison of captured output against fixture files.

use crate::model::OutputFileCheck;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix appended to an expected fixture's file name when archiving a mismatch.
pub const BADFILE_SUFFIX: &str = ".badfile";

/// Result of comparing bytes against an expected fixture.
#[derive(Debug)]
pub enum Comparison {
    Match,
    /// Contents differ; `expected` holds the fixture bytes for diagnostics.
    Mismatch { expected: Vec<u8> },
    /// The expected fixture could not be read.
    ExpectedUnreadable(io::Error),
}

/// Compare `actual` with the full contents of `expected`. No normalization.
pub fn compare(actual: &[u8], expected: &Path) -> Comparison {
    match std::fs::read(expected) {
        Ok(bytes) if bytes == actual => Comparison::Match,
        Ok(bytes) => Comparison::Mismatch { expected: bytes },
        Err(e) => Comparison::ExpectedUnreadable(e),
    }
}

/// Result of checking one produced output file.
#[derive(Debug)]
pub enum FileOutcome {
    Match,
    Mismatch { actual: Vec<u8>, expected: Vec<u8> },
    /// The program did not produce the file (or produced something that is not a file).
    Missing,
    /// The produced file exists but could not be read.
    Unreadable(io::Error),
    ExpectedUnreadable(io::Error),
}

/// Check that `check.produced` exists, is readable, and matches `check.expected`.
pub fn check_output_file(check: &OutputFileCheck) -> FileOutcome {
    if !check.produced.is_file() {
        return FileOutcome::Missing;
    }
    let actual = match std::fs::read(&check.produced) {
        Ok(bytes) => bytes,
        Err(e) => return FileOutcome::Unreadable(e),
    };
    match compare(&actual, &check.expected) {
        Comparison::Match => FileOutcome::Match,
        Comparison::Mismatch { expected } => FileOutcome::Mismatch { actual, expected },
        Comparison::ExpectedUnreadable(e) => FileOutcome::ExpectedUnreadable(e),
    }
}

/// Path used to archive mismatched output next to `expected`.
pub fn badfile_path(expected: &Path) -> PathBuf {
    let mut name: OsString = expected
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(BADFILE_SUFFIX);
    expected.with_file_name(name)
}

/// Write `actual` to the archive path for `expected`, replacing any previous archive.
pub fn archive_mismatch(expected: &Path, actual: &[u8]) -> io::Result<PathBuf> {
    let path = badfile_path(expected);
    std::fs::write(&path, actual)?;
    debug!(path = %path.display(), bytes = actual.len(), "archived mismatched output");
    Ok(path)
}

/// Offset of the first differing byte, or `None` if the slices are equal.
pub fn first_difference(actual: &[u8], expected: &[u8]) -> Option<usize> {
    if actual == expected {
        return None;
    }
    Some(
        actual
            .iter()
            .zip(expected)
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| actual.len().min(expected.len())),
    )
}
