//! Anomaly scoring of container statistics

mod subprocess;

pub use subprocess::SubprocessScorer;

use crate::error::ScoreError;
use crate::models::PredictionInput;
use async_trait::async_trait;

/// Outcome of scoring one container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Normal,
    Anomalous,
}

impl Verdict {
    /// Parse the scorer's trimmed output: `0` or `1`
    pub fn parse(output: &str) -> Result<Self, ScoreError> {
        match output.trim() {
            "0" => Ok(Verdict::Normal),
            "1" => Ok(Verdict::Anomalous),
            other => Err(ScoreError::UnexpectedOutput(other.to_string())),
        }
    }

    /// Value of the `warning` flag attached to a container record
    pub fn is_warning(&self) -> bool {
        matches!(self, Verdict::Anomalous)
    }
}

/// Anything that can turn a feature tuple into a verdict
///
/// One call per container; implementations may spawn a process, call a
/// socket or an HTTP endpoint.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, input: &PredictionInput) -> Result<Verdict, ScoreError>;
}
