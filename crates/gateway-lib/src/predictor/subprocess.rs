//! Scorer backed by a short-lived child process
//!
//! Protocol: the feature tuple is written to stdin as one JSON object, stdin
//! is closed, and the process prints `0` or `1` before exiting with status 0.

use super::{Scorer, Verdict};
use crate::error::ScoreError;
use crate::models::PredictionInput;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Default scoring deadline
pub const DEFAULT_SCORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Spawns one scoring process per call
#[derive(Debug, Clone)]
pub struct SubprocessScorer {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl SubprocessScorer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            timeout: DEFAULT_SCORE_TIMEOUT,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, payload: Vec<u8>) -> Result<std::process::Output, ScoreError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(ScoreError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                // The scorer may exit without reading; its status says why.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(program = %self.program, "Scorer closed stdin early");
                }
                Err(e) => return Err(ScoreError::Io(e)),
            }
        }

        child.wait_with_output().await.map_err(ScoreError::Io)
    }
}

#[async_trait]
impl Scorer for SubprocessScorer {
    async fn score(&self, input: &PredictionInput) -> Result<Verdict, ScoreError> {
        let payload = serde_json::to_vec(input)?;

        let output = tokio::time::timeout(self.timeout, self.run(payload))
            .await
            .map_err(|_| ScoreError::TimedOut(self.timeout))??;

        if !output.status.success() {
            return Err(ScoreError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Verdict::parse(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> SubprocessScorer {
        SubprocessScorer::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    fn input() -> PredictionInput {
        PredictionInput {
            cpu_perc: 97.5,
            mem_usage: 1900.0,
            mem_limit: 1990.0,
            mem_perc: 95.48,
            pids: 7,
        }
    }

    #[tokio::test]
    async fn test_reads_verdict_from_stdout() {
        let verdict = shell("cat > /dev/null; echo 1").score(&input()).await.unwrap();
        assert_eq!(verdict, Verdict::Anomalous);
    }

    #[tokio::test]
    async fn test_input_is_sent_as_json_on_stdin() {
        let scorer = shell(r#"grep -q '"pids":7' && echo 1 || echo 0"#);
        assert_eq!(scorer.score(&input()).await.unwrap(), Verdict::Anomalous);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error_with_stderr() {
        let scorer = shell("cat > /dev/null; echo 'model missing' >&2; exit 3");
        match scorer.score(&input()).await {
            Err(ScoreError::Failed { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "model missing");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exit_without_reading_stdin() {
        let scorer = shell("exit 1");
        assert!(matches!(
            scorer.score(&input()).await,
            Err(ScoreError::Failed { code: Some(1), .. })
        ));
    }

    #[tokio::test]
    async fn test_unexpected_output() {
        let scorer = shell("cat > /dev/null; echo '[1]'");
        assert!(matches!(
            scorer.score(&input()).await,
            Err(ScoreError::UnexpectedOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let scorer = SubprocessScorer::new("/nonexistent/scorer", vec![]);
        assert!(matches!(
            scorer.score(&input()).await,
            Err(ScoreError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_scorer_times_out() {
        let scorer = shell("sleep 5; echo 0").with_timeout(Duration::from_millis(100));
        assert!(matches!(
            scorer.score(&input()).await,
            Err(ScoreError::TimedOut(_))
        ));
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("verdict"), "0\n").unwrap();

        let scorer = shell("cat > /dev/null; cat verdict").with_working_dir(dir.path());
        assert_eq!(scorer.score(&input()).await.unwrap(), Verdict::Normal);
    }
}
