//! Core library of the hop gateway
//!
//! This crate provides:
//! - Double-hop SSH tunnels through a bastion to private VMs
//! - Remote command execution and Docker output decoding
//! - Concurrent anomaly scoring of container statistics
//! - Docker management operations
//! - Health checks and observability

pub mod decode;
pub mod docker;
pub mod error;
pub mod exec;
pub mod health;
pub mod inventory;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod predictor;
pub mod tunnel;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use docker::DockerOps;
pub use error::{GatewayError, Result};
pub use exec::{CommandRunner, RemoteCommandExecutor, RemoteSession, StreamEvent};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use inventory::{BastionConfig, TimeoutConfig, VmAccessConfig, VmRegistry};
pub use models::*;
pub use observability::{GatewayMetrics, StructuredLogger};
pub use orchestrator::{MetricsOrchestrator, PollOutcome};
pub use predictor::{Scorer, SubprocessScorer, Verdict};
pub use tunnel::{Ssh2Transport, SshTransport, Tunnel, TunnelManager};
