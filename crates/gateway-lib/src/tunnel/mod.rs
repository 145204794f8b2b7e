//! Double-hop SSH tunnels (operator → bastion → VM)
//!
//! A tunnel is built per request by walking a small state machine:
//!
//! ```text
//! Connecting → BastionReady → ForwardReady → VmReady
//!      └────────────┴──────────────┴──────→ Failed
//! ```
//!
//! The network work is delegated to an [`SshTransport`], which keeps every
//! transition testable with a scripted transport. Whatever happens after the
//! bastion leg is up, it is closed before an error is returned.

mod bridge;
mod ssh;

pub use ssh::{BastionLink, ForwardedSocket, Ssh2Transport, VmLink};

use crate::error::TunnelError;
use crate::exec::RemoteSession;
use crate::inventory::{BastionConfig, TimeoutConfig, VmAccessConfig, VmRegistry};
use crate::observability::{GatewayMetrics, StructuredLogger};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Transport that can perform each leg of the double hop
///
/// All methods block and are driven from a blocking task.
pub trait SshTransport: Send + Sync + 'static {
    /// Authenticated connection to the bastion
    type Bastion: Send + 'static;
    /// Stream forwarded through the bastion to a VM's SSH port
    type Forward: Send + 'static;
    /// Authenticated connection to the VM
    type Session: RemoteSession + 'static;

    fn connect_bastion(&self, bastion: &BastionConfig) -> anyhow::Result<Self::Bastion>;

    fn forward(
        &self,
        bastion: &mut Self::Bastion,
        host: &str,
        port: u16,
    ) -> anyhow::Result<Self::Forward>;

    fn connect_vm(
        &self,
        forward: Self::Forward,
        host: &str,
        access: &VmAccessConfig,
    ) -> anyhow::Result<Self::Session>;

    fn close_session(&self, session: Self::Session);

    fn close_bastion(&self, bastion: Self::Bastion);
}

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Connecting,
    BastionReady,
    ForwardReady,
    VmReady,
    Failed,
}

/// An open bastion → VM tunnel
///
/// Both legs live and die together. [`Tunnel::close`] closes them and waits;
/// dropping the tunnel closes them in the background.
pub struct Tunnel<T: SshTransport> {
    transport: Arc<T>,
    vm: String,
    host: String,
    legs: Option<(T::Bastion, T::Session)>,
}

impl<T: SshTransport> Tunnel<T> {
    pub fn vm(&self) -> &str {
        &self.vm
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn state(&self) -> TunnelState {
        if self.legs.is_some() {
            TunnelState::VmReady
        } else {
            TunnelState::Failed
        }
    }

    /// The VM-side session, `None` once the tunnel is torn down
    pub fn session_mut(&mut self) -> Option<&mut T::Session> {
        self.legs.as_mut().map(|(_, session)| session)
    }

    /// Tear down both legs on the blocking pool and wait for it
    pub async fn close(mut self) {
        let Some(legs) = self.legs.take() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        let vm = self.vm.clone();
        let task = tokio::task::spawn_blocking(move || close_legs(transport.as_ref(), &vm, legs));
        if let Err(e) = task.await {
            tracing::warn!(vm = %self.vm, error = %e, "Tunnel teardown task failed");
        }
    }
}

impl<T: SshTransport> Drop for Tunnel<T> {
    /// A tunnel dropped inside a runtime (a cancelled request) is closed on
    /// the blocking pool, never on the thread polling the request.
    fn drop(&mut self) {
        let Some(legs) = self.legs.take() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        let vm = std::mem::take(&mut self.vm);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || close_legs(transport.as_ref(), &vm, legs));
            }
            Err(_) => close_legs(transport.as_ref(), &vm, legs),
        }
    }
}

fn close_legs<T: SshTransport>(transport: &T, vm: &str, (bastion, session): (T::Bastion, T::Session)) {
    transport.close_session(session);
    transport.close_bastion(bastion);
    debug!(vm = %vm, "Tunnel closed");
}

/// Opens tunnels to registered VMs
pub struct TunnelManager<T: SshTransport> {
    transport: Arc<T>,
    registry: Arc<VmRegistry>,
    bastion: Arc<BastionConfig>,
    access: Arc<VmAccessConfig>,
    connect_timeout: Duration,
    metrics: GatewayMetrics,
    logger: StructuredLogger,
}

impl<T: SshTransport> Clone for TunnelManager<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            bastion: Arc::clone(&self.bastion),
            access: Arc::clone(&self.access),
            connect_timeout: self.connect_timeout,
            metrics: self.metrics.clone(),
            logger: self.logger.clone(),
        }
    }
}

impl<T: SshTransport> TunnelManager<T> {
    pub fn new(
        transport: T,
        registry: VmRegistry,
        bastion: BastionConfig,
        access: VmAccessConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        let logger = StructuredLogger::new(bastion.host.clone());
        Self {
            transport: Arc::new(transport),
            registry: Arc::new(registry),
            bastion: Arc::new(bastion),
            access: Arc::new(access),
            connect_timeout: timeouts.connect(),
            metrics: GatewayMetrics::new(),
            logger,
        }
    }

    pub fn registry(&self) -> &VmRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Open a tunnel to `vm`
    ///
    /// Unknown VM names fail before any network activity.
    pub async fn open(&self, vm: &str) -> Result<Tunnel<T>, TunnelError> {
        let host = self
            .registry
            .resolve(vm)
            .ok_or_else(|| TunnelError::UnknownVm(vm.to_string()))?
            .to_string();

        let start = Instant::now();
        let transport = Arc::clone(&self.transport);
        let bastion = Arc::clone(&self.bastion);
        let access = Arc::clone(&self.access);
        let vm_name = vm.to_string();

        // If the deadline fires first the blocking task still finishes;
        // dropping its Tunnel closes whatever it opened.
        let task = tokio::task::spawn_blocking(move || {
            establish(transport, &bastion, &access, vm_name, host)
        });

        let result = match tokio::time::timeout(self.connect_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(TunnelError::Aborted(e.to_string())),
            Err(_) => Err(TunnelError::TimedOut {
                vm: vm.to_string(),
                after: self.connect_timeout,
            }),
        };

        match &result {
            Ok(tunnel) => {
                let elapsed = start.elapsed();
                self.metrics.observe_tunnel_open(elapsed.as_secs_f64());
                self.logger
                    .log_tunnel_opened(vm, tunnel.host(), elapsed.as_millis() as u64);
            }
            Err(e) => {
                self.metrics.inc_tunnel_failures(e.stage().as_str());
                self.logger.log_tunnel_failed(vm, e.stage().as_str(), &e.to_string());
            }
        }
        result
    }
}

/// Walk the handshake state machine for one tunnel
fn establish<T: SshTransport>(
    transport: Arc<T>,
    bastion_cfg: &BastionConfig,
    access: &VmAccessConfig,
    vm: String,
    host: String,
) -> Result<Tunnel<T>, TunnelError> {
    let mut state = TunnelState::Connecting;
    debug!(vm = %vm, state = ?state, bastion = %bastion_cfg.address(), "Opening tunnel");

    let mut bastion = match transport.connect_bastion(bastion_cfg) {
        Ok(b) => b,
        Err(e) => {
            debug!(vm = %vm, from = ?state, "Bastion leg failed");
            return Err(TunnelError::BastionUnreachable {
                bastion: bastion_cfg.address(),
                reason: format!("{:#}", e),
            });
        }
    };
    state = TunnelState::BastionReady;
    debug!(vm = %vm, state = ?state, "Bastion authenticated");

    let forward = match transport.forward(&mut bastion, &host, access.port) {
        Ok(f) => f,
        Err(e) => {
            debug!(vm = %vm, from = ?state, "Forward failed, closing bastion leg");
            transport.close_bastion(bastion);
            return Err(TunnelError::ForwardFailed {
                host,
                port: access.port,
                reason: format!("{:#}", e),
            });
        }
    };
    state = TunnelState::ForwardReady;
    debug!(vm = %vm, state = ?state, host = %host, "Forward established");

    let session = match transport.connect_vm(forward, &host, access) {
        Ok(s) => s,
        Err(e) => {
            debug!(vm = %vm, from = ?state, "VM authentication failed, closing bastion leg");
            transport.close_bastion(bastion);
            return Err(TunnelError::VmAuthFailed {
                vm,
                host,
                reason: format!("{:#}", e),
            });
        }
    };
    state = TunnelState::VmReady;
    debug!(vm = %vm, state = ?state, "VM authenticated");

    Ok(Tunnel {
        transport,
        vm,
        host,
        legs: Some((bastion, session)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelStage;
    use crate::testing::{eventually, test_manager, FakeTransport};

    #[tokio::test]
    async fn test_open_reaches_vm_ready() {
        let transport = FakeTransport::new();
        let manager = test_manager(transport.clone());

        let tunnel = manager.open("vm1").await.unwrap();
        assert_eq!(tunnel.state(), TunnelState::VmReady);
        assert_eq!(tunnel.vm(), "vm1");
        assert_eq!(tunnel.host(), "192.168.5.50");
        assert_eq!(transport.forwards(), vec!["192.168.5.50:22".to_string()]);

        tunnel.close().await;
        assert_eq!(transport.bastion_closes(), 1);
        assert_eq!(transport.session_closes(), 1);
    }

    #[tokio::test]
    async fn test_unknown_vm_makes_no_connection_attempt() {
        let transport = FakeTransport::new();
        let manager = test_manager(transport.clone());

        let err = manager.open("vm42").await.err().unwrap();
        assert!(matches!(err, TunnelError::UnknownVm(ref name) if name == "vm42"));
        assert_eq!(transport.bastion_attempts(), 0);
    }

    #[tokio::test]
    async fn test_bastion_failure_stops_immediately() {
        let transport = FakeTransport::failing_at(TunnelStage::Bastion);
        let manager = test_manager(transport.clone());

        let err = manager.open("vm1").await.err().unwrap();
        assert!(matches!(err, TunnelError::BastionUnreachable { .. }));
        assert_eq!(transport.bastion_attempts(), 1);
        assert!(transport.forwards().is_empty());
        assert_eq!(transport.bastion_closes(), 0);
    }

    #[tokio::test]
    async fn test_forward_failure_closes_bastion_once() {
        let transport = FakeTransport::failing_at(TunnelStage::Forward);
        let manager = test_manager(transport.clone());

        let err = manager.open("vm2").await.err().unwrap();
        assert!(matches!(err, TunnelError::ForwardFailed { ref host, port: 22, .. } if host == "192.168.5.27"));
        assert_eq!(transport.bastion_closes(), 1);
        assert_eq!(transport.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_vm_auth_failure_closes_bastion_once_without_leaking_session() {
        let transport = FakeTransport::failing_at(TunnelStage::VmAuth);
        let manager = test_manager(transport.clone());

        let err = manager.open("vm1").await.err().unwrap();
        assert!(matches!(err, TunnelError::VmAuthFailed { ref vm, .. } if vm == "vm1"));
        assert_eq!(transport.bastion_closes(), 1);
        assert_eq!(transport.sessions_opened(), 0);
        assert_eq!(transport.session_closes(), 0);
    }

    #[tokio::test]
    async fn test_dropping_tunnel_closes_both_legs_once() {
        let transport = FakeTransport::new();
        let manager = test_manager(transport.clone());

        {
            let _tunnel = manager.open("vm1").await.unwrap();
        }
        assert!(eventually(|| transport.bastion_closes() == 1).await);
        assert_eq!(transport.session_closes(), 1);
        assert!(!transport
            .close_threads()
            .contains(&std::thread::current().id()));
    }

    #[test]
    fn test_dropping_tunnel_outside_runtime_closes_inline() {
        let transport = FakeTransport::new();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tunnel = runtime
            .block_on(test_manager(transport.clone()).open("vm1"))
            .unwrap();

        drop(tunnel);
        assert_eq!(transport.bastion_closes(), 1);
        assert_eq!(transport.session_closes(), 1);
        assert_eq!(
            transport.close_threads(),
            vec![std::thread::current().id(); 2]
        );
    }

    #[tokio::test]
    async fn test_connect_deadline() {
        let transport = FakeTransport::new().with_connect_delay(Duration::from_millis(500));
        let manager = TunnelManager::new(
            transport.clone(),
            crate::testing::test_registry(),
            crate::testing::test_bastion(),
            crate::testing::test_access(),
            TimeoutConfig {
                connect_secs: 0,
                ..TimeoutConfig::default()
            },
        );

        let err = manager.open("vm1").await.err().unwrap();
        assert!(matches!(err, TunnelError::TimedOut { .. }));

        // The late tunnel is torn down by the abandoned task.
        assert!(eventually(|| transport.bastion_closes() == 1).await);
        assert_eq!(transport.session_closes(), 1);
    }
}
