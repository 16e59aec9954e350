//! Score aggregation, severity banding and exit-code policy.

use crate::model::RunPolicy;
use serde::Serialize;

/// Passed and attempted test counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Score {
    pub passed: usize,
    pub total: usize,
}

/// Display emphasis for the final score line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Success,
    Warning,
    Failure,
}

impl Score {
    #[cfg(test)]
    pub fn new(passed: usize, total: usize) -> Self {
        debug_assert!(passed <= total);
        Self { passed, total }
    }

    pub fn record(&mut self, passed: bool) {
        self.total += 1;
        if passed {
            self.passed += 1;
        }
    }

    pub fn failed(&self) -> usize {
        self.total - self.passed
    }

    /// `round(passed / total * 100)` with halves rounded up. An empty score is 0%.
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        // floor(100p/t + 1/2) in integers, so 2/3 -> 67 and 1/8 -> 13 exactly.
        ((self.passed * 200 + self.total) / (self.total * 2)) as u32
    }

    pub fn tier(&self) -> Tier {
        if self.total > 0 && self.passed == self.total {
            Tier::Success
        } else if self.percent() >= 90 || (self.failed() == 1 && self.passed > 0) {
            Tier::Warning
        } else {
            Tier::Failure
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// Process exit code for a completed (or first-failure aborted) run.
    pub fn exit_code(&self, policy: &RunPolicy) -> i32 {
        if policy.score_exit_code {
            100 - self.percent() as i32
        } else if self.all_passed() {
            0
        } else {
            1
        }
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} tests passed ({}%).",
            self.passed,
            self.total,
            self.percent()
        )
    }
}
