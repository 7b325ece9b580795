//! Failure reports: what failed, the minimal sequence, and how to reproduce it.

use crate::error::Failure;
use crate::execution::Step;
use std::fmt;
use std::time::Duration;

/// How the failing sequence was minimized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkStats {
    pub original_steps: usize,
    pub original_choices: usize,
    pub attempts: usize,
    pub accepted: usize,
    pub duration: Duration,
    /// False when the budget ran out before a fixed point
    pub completed: bool,
}

/// A minimal failing sequence
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub test: String,
    pub seed: u64,
    pub steps: Vec<Step>,
    pub failure: Failure,
    /// Choices replaying the sequence, see [`StatefulTest::replay`](crate::StatefulTest::replay)
    pub choices: Vec<u64>,
    pub shrink: Option<ShrinkStats>,
    /// The failure came from a saved example, which `seed` does not regenerate
    pub from_database: bool,
}

impl FailureReport {
    /// The steps as a reproduction script, one call per line
    pub fn script(&self) -> Vec<String> {
        self.steps.iter().map(ToString::to_string).collect()
    }

    /// Serializable form of the report
    #[cfg(feature = "persistence")]
    pub fn to_record(&self) -> ReportRecord {
        ReportRecord {
            test: self.test.clone(),
            seed: self.seed,
            kind: self.failure.kind.to_string(),
            site: self.failure.site.clone(),
            message: self.failure.message.clone(),
            failing_step: self.failure.step,
            script: self.script(),
            choices: self.choices.clone(),
            shrink_attempts: self.shrink.as_ref().map_or(0, |s| s.attempts),
            from_database: self.from_database,
            timestamp: chrono::Utc::now(),
        }
    }

    #[cfg(feature = "persistence")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_record())
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Falsifying example for `{}` (seed {}):", self.test, self.seed)?;
        if self.steps.is_empty() {
            writeln!(f, "    (no steps)")?;
        }
        for (index, step) in self.steps.iter().enumerate() {
            let marker = if self.failure.step == Some(index) { " <-" } else { "" };
            writeln!(f, "    {step}{marker}")?;
        }
        writeln!(f, "{}", self.failure)?;

        if let Some(shrink) = &self.shrink {
            write!(
                f,
                "Shrunk from {} steps to {} in {} attempts ({} accepted, {:.2?})",
                shrink.original_steps,
                self.steps.len(),
                shrink.attempts,
                shrink.accepted,
                shrink.duration
            )?;
            if !shrink.completed {
                write!(f, ", budget exhausted")?;
            }
            writeln!(f)?;
        }
        if self.from_database {
            write!(
                f,
                "Found in the example database; reproduce with StatefulTest::replay(&{:?})",
                self.choices
            )
        } else {
            write!(f, "Reproduce with RULECHECK_SEED={}", self.seed)
        }
    }
}

/// JSON-friendly snapshot of a [`FailureReport`]
#[cfg(feature = "persistence")]
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReportRecord {
    pub test: String,
    pub seed: u64,
    pub kind: String,
    pub site: String,
    pub message: String,
    pub failing_step: Option<usize>,
    pub script: Vec<String>,
    pub choices: Vec<u64>,
    pub shrink_attempts: usize,
    #[serde(default)]
    pub from_database: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(feature = "persistence")]
impl ReportRecord {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
