//! Error taxonomy for the remote execution path
//!
//! Each stage of a request has its own error type; `GatewayError` is what
//! callers of the library see.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Stage of the double-hop handshake at which a tunnel failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStage {
    Lookup,
    Bastion,
    Forward,
    VmAuth,
    Deadline,
}

impl TunnelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStage::Lookup => "lookup",
            TunnelStage::Bastion => "bastion",
            TunnelStage::Forward => "forward",
            TunnelStage::VmAuth => "vm_auth",
            TunnelStage::Deadline => "deadline",
        }
    }
}

/// Failure while opening a bastion → VM tunnel
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Invalid VM name: {0}")]
    UnknownVm(String),

    #[error("Bastion {bastion} unreachable: {reason}")]
    BastionUnreachable { bastion: String, reason: String },

    #[error("Port forward to {host}:{port} through the bastion failed: {reason}")]
    ForwardFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication to VM {vm} ({host}) failed: {reason}")]
    VmAuthFailed {
        vm: String,
        host: String,
        reason: String,
    },

    #[error("Tunnel to VM {vm} not ready after {after:?}")]
    TimedOut { vm: String, after: Duration },

    #[error("Tunnel task aborted: {0}")]
    Aborted(String),
}

impl TunnelError {
    pub fn stage(&self) -> TunnelStage {
        match self {
            TunnelError::UnknownVm(_) => TunnelStage::Lookup,
            TunnelError::BastionUnreachable { .. } => TunnelStage::Bastion,
            TunnelError::ForwardFailed { .. } => TunnelStage::Forward,
            TunnelError::VmAuthFailed { .. } => TunnelStage::VmAuth,
            TunnelError::TimedOut { .. } | TunnelError::Aborted(_) => TunnelStage::Deadline,
        }
    }
}

/// Failure while running a command over an open tunnel
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to start remote command: {0}")]
    ExecFailed(String),

    #[error("Remote output stream failed: {0}")]
    StreamFailed(String),

    #[error("Remote command did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Failure to decode a whole-document JSON response
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON output: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Command produced an empty JSON document")]
    Empty,
}

/// Failure of the external scoring process
///
/// Never fatal to a metrics poll: the affected container is reported
/// with `warning = false`.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Failed to encode prediction input: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to spawn scorer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Scorer I/O failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("Scorer exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Scorer produced unexpected output: {0:?}")]
    UnexpectedOutput(String),

    #[error("Scorer did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Rejected or failed Docker operation
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("{0} is required")]
    MissingArgument(&'static str),

    #[error("Docker rejected the command: {stderr}")]
    Rejected { stderr: String },
}

/// Error returned by gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("No valid metrics data returned by docker stats on {vm}")]
    NoMetricsData { vm: String },
}

impl GatewayError {
    /// True when the request was malformed and nothing was attempted remotely
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            GatewayError::Tunnel(TunnelError::UnknownVm(_))
                | GatewayError::Command(CommandError::InvalidArgument { .. })
                | GatewayError::Command(CommandError::MissingArgument(_))
        )
    }

    /// True when a configured deadline expired
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GatewayError::Tunnel(TunnelError::TimedOut { .. })
                | GatewayError::Exec(ExecError::TimedOut(_))
        )
    }
}
