//! libssh2-backed transport
//!
//! Bastion leg: TCP + handshake + public key auth. Forward: a
//! `direct-tcpip` channel relayed onto a loopback socket. VM leg: a second
//! session whose transport is that socket.

use super::bridge::Bridge;
use super::SshTransport;
use crate::exec::{RemoteSession, StreamEvent, EVENT_BUFFER};
use crate::inventory::{BastionConfig, VmAccessConfig};
use anyhow::{Context, Result};
use ssh2::{Channel, Session};
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_BUFFER: usize = 8192;
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// [`SshTransport`] built on the `ssh2` crate
#[derive(Debug, Clone)]
pub struct Ssh2Transport {
    timeout: Duration,
}

impl Ssh2Transport {
    /// `timeout` bounds every blocking libssh2 call and the TCP connect
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn timeout_ms(&self) -> u32 {
        self.timeout.as_millis().min(u32::MAX as u128) as u32
    }

    fn authenticate(&self, session: &Session, user: &str, identity_file: &Path) -> Result<()> {
        session
            .userauth_pubkey_file(user, None, identity_file, None)
            .with_context(|| {
                format!(
                    "Public key authentication as {} with {} failed",
                    user,
                    identity_file.display()
                )
            })?;
        if !session.authenticated() {
            anyhow::bail!("Server did not accept the key for {}", user);
        }
        Ok(())
    }
}

/// Authenticated bastion session plus the relay it feeds
pub struct BastionLink {
    session: Session,
    bridge: Option<Bridge>,
}

/// Local end of the relayed forward
pub struct ForwardedSocket {
    socket: TcpStream,
}

/// Authenticated VM session
pub struct VmLink {
    session: Session,
}

impl SshTransport for Ssh2Transport {
    type Bastion = BastionLink;
    type Forward = ForwardedSocket;
    type Session = VmLink;

    fn connect_bastion(&self, bastion: &BastionConfig) -> Result<BastionLink> {
        let addr = (bastion.host.as_str(), bastion.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {}", bastion.address()))?
            .next()
            .with_context(|| format!("No address for {}", bastion.address()))?;
        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .with_context(|| format!("Failed to connect to {}", addr))?;

        let mut session = Session::new().context("Failed to create SSH session")?;
        session.set_timeout(self.timeout_ms());
        session.set_tcp_stream(tcp);
        session.handshake().context("SSH handshake with bastion failed")?;
        self.authenticate(&session, &bastion.user, &bastion.identity_file)?;

        Ok(BastionLink {
            session,
            bridge: None,
        })
    }

    fn forward(&self, bastion: &mut BastionLink, host: &str, port: u16) -> Result<ForwardedSocket> {
        let channel = bastion
            .session
            .channel_direct_tcpip(host, port, None)
            .with_context(|| format!("Bastion refused forward to {}:{}", host, port))?;
        let (socket, bridge) = Bridge::spawn(&bastion.session, channel)?;
        bastion.bridge = Some(bridge);
        Ok(ForwardedSocket { socket })
    }

    fn connect_vm(
        &self,
        forward: ForwardedSocket,
        host: &str,
        access: &VmAccessConfig,
    ) -> Result<VmLink> {
        let mut session = Session::new().context("Failed to create SSH session")?;
        session.set_timeout(self.timeout_ms());
        session.set_tcp_stream(forward.socket);
        session
            .handshake()
            .with_context(|| format!("SSH handshake with {} failed", host))?;
        self.authenticate(&session, &access.user, &access.identity_file)?;
        Ok(VmLink { session })
    }

    fn close_session(&self, vm: VmLink) {
        vm.session.set_blocking(true);
        if let Err(e) = vm.session.disconnect(None, "session finished", None) {
            debug!(error = %e, "VM disconnect failed");
        }
    }

    fn close_bastion(&self, mut bastion: BastionLink) {
        if let Some(mut bridge) = bastion.bridge.take() {
            bridge.stop();
        }
        bastion.session.set_blocking(true);
        if let Err(e) = bastion.session.disconnect(None, "tunnel closed", None) {
            debug!(error = %e, "Bastion disconnect failed");
        }
    }
}

impl RemoteSession for VmLink {
    fn exec(&mut self, command: &str) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let session = self.session.clone();
        let command = command.to_string();
        let fallback = tx.clone();

        let spawned = thread::Builder::new()
            .name("remote-exec".to_string())
            .spawn(move || stream_command(session, &command, tx));
        if let Err(e) = spawned {
            let _ = fallback.try_send(StreamEvent::Rejected(format!(
                "Failed to spawn exec thread: {}",
                e
            )));
        }
        rx
    }
}

fn open_exec_channel(session: &Session, command: &str) -> Result<Channel, ssh2::Error> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;
    Ok(channel)
}

/// Read both streams of a started command until EOF, forwarding chunks
fn stream_command(session: Session, command: &str, tx: mpsc::Sender<StreamEvent>) {
    let mut channel = match open_exec_channel(&session, command) {
        Ok(channel) => channel,
        Err(e) => {
            let _ = tx.blocking_send(StreamEvent::Rejected(e.to_string()));
            return;
        }
    };
    session.set_blocking(false);

    let mut stderr = channel.stderr();
    let mut buf = [0u8; READ_BUFFER];

    loop {
        if tx.is_closed() {
            debug!("Output receiver dropped, abandoning remote command");
            return;
        }
        let mut progressed = false;

        match channel.read(&mut buf) {
            Ok(n) if n > 0 => {
                if tx.blocking_send(StreamEvent::Stdout(buf[..n].to_vec())).is_err() {
                    return;
                }
                progressed = true;
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                let _ = tx.blocking_send(StreamEvent::Failed(format!("stdout read failed: {}", e)));
                return;
            }
        }

        match stderr.read(&mut buf) {
            Ok(n) if n > 0 => {
                if tx.blocking_send(StreamEvent::Stderr(buf[..n].to_vec())).is_err() {
                    return;
                }
                progressed = true;
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                let _ = tx.blocking_send(StreamEvent::Failed(format!("stderr read failed: {}", e)));
                return;
            }
        }

        if !progressed {
            if channel.eof() {
                break;
            }
            thread::sleep(IDLE_BACKOFF);
        }
    }

    session.set_blocking(true);
    if let Err(e) = channel.wait_close() {
        warn!(error = %e, "Remote channel did not close cleanly");
    }
    let _ = tx.blocking_send(StreamEvent::Closed);
}
