//! Remote command execution over an open tunnel
//!
//! A session turns a command line into a finite stream of [`StreamEvent`]s
//! delivered over a tokio channel. The executor consumes that stream in a
//! single loop, keeping stdout and stderr apart in the order received.

use crate::error::{ExecError, GatewayError, TunnelError};
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::models::CommandResult;
use crate::observability::GatewayMetrics;
use crate::tunnel::{SshTransport, TunnelManager};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the per-command event channel
pub const EVENT_BUFFER: usize = 64;

/// One step of a remote command's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The remote shell session could not be started
    Rejected(String),
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Both streams reached end-of-file
    Closed,
    /// Transport failure after the command started
    Failed(String),
}

/// Authenticated VM-side connection able to start commands
pub trait RemoteSession: Send {
    /// Start `command` verbatim in the remote shell
    fn exec(&mut self, command: &str) -> mpsc::Receiver<StreamEvent>;
}

/// Runs commands over a tunnel and buffers their output
///
/// The executor never opens or closes tunnels.
#[derive(Debug, Clone)]
pub struct RemoteCommandExecutor {
    timeout: Duration,
}

impl RemoteCommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `command` on the tunnel's VM and collect its output
    pub async fn run<T: SshTransport>(
        &self,
        tunnel: &mut crate::tunnel::Tunnel<T>,
        command: &str,
    ) -> Result<CommandResult, ExecError> {
        let vm = tunnel.vm().to_string();
        let session = tunnel
            .session_mut()
            .ok_or_else(|| ExecError::ExecFailed("tunnel is closed".to_string()))?;

        debug!(vm = %vm, command = %command, "Executing remote command");
        let mut events = session.exec(command);

        match tokio::time::timeout(self.timeout, accumulate(&mut events)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(vm = %vm, command = %command, "Remote command timed out");
                Err(ExecError::TimedOut(self.timeout))
            }
        }
    }
}

/// Drain a session's event stream into a [`CommandResult`]
///
/// A sender dropped without an explicit `Closed` still counts as completion.
pub async fn accumulate(
    events: &mut mpsc::Receiver<StreamEvent>,
) -> Result<CommandResult, ExecError> {
    let mut result = CommandResult::default();

    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Stdout(bytes) => result.stdout.extend_from_slice(&bytes),
            StreamEvent::Stderr(bytes) => result.stderr.extend_from_slice(&bytes),
            StreamEvent::Closed => break,
            StreamEvent::Rejected(message) => return Err(ExecError::ExecFailed(message)),
            StreamEvent::Failed(message) => return Err(ExecError::StreamFailed(message)),
        }
    }

    if !result.stderr.is_empty() {
        debug!(stderr = %result.stderr_lossy().trim_end(), "Remote command wrote to stderr");
    }
    Ok(result)
}

/// One-shot helper: open a tunnel, run one command, close the tunnel
pub struct CommandRunner<T: SshTransport> {
    tunnels: TunnelManager<T>,
    executor: RemoteCommandExecutor,
    metrics: GatewayMetrics,
    health: Option<HealthRegistry>,
}

impl<T: SshTransport> Clone for CommandRunner<T> {
    fn clone(&self) -> Self {
        Self {
            tunnels: self.tunnels.clone(),
            executor: self.executor.clone(),
            metrics: self.metrics.clone(),
            health: self.health.clone(),
        }
    }
}

impl<T: SshTransport> CommandRunner<T> {
    pub fn new(tunnels: TunnelManager<T>, executor: RemoteCommandExecutor) -> Self {
        Self {
            tunnels,
            executor,
            metrics: GatewayMetrics::new(),
            health: None,
        }
    }

    /// Record each tunnel outcome as the health of its VM
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn tunnels(&self) -> &TunnelManager<T> {
        &self.tunnels
    }

    pub fn health(&self) -> Option<&HealthRegistry> {
        self.health.as_ref()
    }

    /// Run `command` on `vm` in a fresh tunnel
    ///
    /// The tunnel is closed before returning, whatever the outcome.
    pub async fn run(&self, vm: &str, command: &str) -> Result<CommandResult, GatewayError> {
        let opened = self.tunnels.open(vm).await;
        let update = tunnel_health(opened.as_ref().err());
        self.record_tunnel_health(vm, update).await;
        let mut tunnel = opened?;

        let start = Instant::now();
        let result = self.executor.run(&mut tunnel, command).await;
        self.metrics
            .observe_command_latency(start.elapsed().as_secs_f64());

        tunnel.close().await;
        Ok(result?)
    }

    async fn record_tunnel_health(&self, vm: &str, update: Option<ComponentHealth>) {
        if let (Some(health), Some(update)) = (&self.health, update) {
            health.update(&components::vm(vm), update).await;
        }
    }
}

/// Health of a VM after a tunnel attempt; unknown names are not tracked
fn tunnel_health(failure: Option<&TunnelError>) -> Option<ComponentHealth> {
    match failure {
        None => Some(ComponentHealth::healthy()),
        Some(TunnelError::UnknownVm(_)) => None,
        Some(e) => Some(ComponentHealth::unhealthy(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_manager, FakeTransport};

    fn feed(events: Vec<StreamEvent>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn test_accumulate_splits_streams_in_order() {
        let mut rx = feed(vec![
            StreamEvent::Stdout(b"line one\n".to_vec()),
            StreamEvent::Stderr(b"warn: ".to_vec()),
            StreamEvent::Stdout(b"line two\n".to_vec()),
            StreamEvent::Stderr(b"disk low\n".to_vec()),
            StreamEvent::Closed,
        ]);

        let result = accumulate(&mut rx).await.unwrap();
        assert_eq!(result.stdout, b"line one\nline two\n");
        assert_eq!(result.stderr, b"warn: disk low\n");
    }

    #[tokio::test]
    async fn test_accumulate_treats_dropped_sender_as_close() {
        let mut rx = feed(vec![StreamEvent::Stdout(b"partial".to_vec())]);
        let result = accumulate(&mut rx).await.unwrap();
        assert_eq!(result.stdout_lossy(), "partial");
    }

    #[tokio::test]
    async fn test_accumulate_rejected_session() {
        let mut rx = feed(vec![StreamEvent::Rejected("channel open failure".into())]);
        let err = accumulate(&mut rx).await.unwrap_err();
        assert!(matches!(err, ExecError::ExecFailed(ref m) if m == "channel open failure"));
    }

    #[tokio::test]
    async fn test_accumulate_stream_failure() {
        let mut rx = feed(vec![
            StreamEvent::Stdout(b"x".to_vec()),
            StreamEvent::Failed("connection reset".into()),
        ]);
        assert!(matches!(
            accumulate(&mut rx).await,
            Err(ExecError::StreamFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_executor_sends_command_verbatim() {
        let transport = FakeTransport::new().respond(|_| {
            vec![
                StreamEvent::Stdout(b"ok".to_vec()),
                StreamEvent::Closed,
            ]
        });
        let manager = test_manager(transport.clone());
        let executor = RemoteCommandExecutor::new(Duration::from_secs(5));

        let mut tunnel = manager.open("vm1").await.unwrap();
        let result = executor
            .run(&mut tunnel, "docker exec web sh -c 'echo $HOME; ls'")
            .await
            .unwrap();
        tunnel.close().await;

        assert_eq!(result.stdout_lossy(), "ok");
        assert_eq!(
            transport.commands(),
            vec!["docker exec web sh -c 'echo $HOME; ls'".to_string()]
        );
    }

    #[tokio::test]
    async fn test_executor_times_out_on_silent_command() {
        let transport = FakeTransport::new().hang_on_exec();
        let manager = test_manager(transport.clone());
        let executor = RemoteCommandExecutor::new(Duration::from_millis(50));

        let mut tunnel = manager.open("vm1").await.unwrap();
        let err = executor.run(&mut tunnel, "sleep 3600").await.unwrap_err();
        assert!(matches!(err, ExecError::TimedOut(_)));

        tunnel.close().await;
        assert_eq!(transport.bastion_closes(), 1);
    }

    #[tokio::test]
    async fn test_runner_closes_tunnel_on_exec_failure() {
        let transport = FakeTransport::new()
            .respond(|_| vec![StreamEvent::Rejected("session refused".into())]);
        let runner = CommandRunner::new(
            test_manager(transport.clone()),
            RemoteCommandExecutor::new(Duration::from_secs(5)),
        );

        let err = runner.run("vm1", "docker ps").await.unwrap_err();
        assert!(matches!(err, GatewayError::Exec(ExecError::ExecFailed(_))));
        assert_eq!(transport.bastion_closes(), 1);
        assert_eq!(transport.session_closes(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_closes_tunnel_off_the_polling_thread() {
        let transport = FakeTransport::new().hang_on_exec();
        let runner = CommandRunner::new(
            test_manager(transport.clone()),
            RemoteCommandExecutor::new(Duration::from_secs(30)),
        );

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), runner.run("vm1", "sleep 3600")).await;
        assert!(cancelled.is_err());

        assert!(crate::testing::eventually(|| transport.bastion_closes() == 1).await);
        assert_eq!(transport.session_closes(), 1);
        let polling_thread = std::thread::current().id();
        assert!(transport
            .close_threads()
            .iter()
            .all(|thread| *thread != polling_thread));
    }

    #[tokio::test]
    async fn test_runner_records_vm_health() {
        let health = HealthRegistry::new();
        let failing = crate::testing::test_runner(FakeTransport::failing_at(
            crate::error::TunnelStage::Bastion,
        ))
        .with_health(health.clone());

        assert!(failing.run("vm1", "docker ps").await.is_err());
        assert!(failing.run("vm42", "docker ps").await.is_err());

        let report = health.health().await;
        let vm1 = &report.components[&components::vm("vm1")];
        assert_eq!(vm1.status, crate::health::ComponentStatus::Unhealthy);
        assert!(!report.components.contains_key(&components::vm("vm42")));

        let working = crate::testing::test_runner(FakeTransport::new()).with_health(health.clone());
        working.run("vm1", "docker ps").await.unwrap();
        assert_eq!(
            health.health().await.components[&components::vm("vm1")].status,
            crate::health::ComponentStatus::Healthy
        );
    }
}
