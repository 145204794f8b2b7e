//! Relay between a bastion `direct-tcpip` channel and a loopback socket
//!
//! libssh2 sessions need a real socket as transport, so the VM leg talks to
//! one end of a loopback TCP pair while a pump thread shuttles bytes between
//! the other end and the forwarded channel on the bastion session.

use anyhow::{Context, Result};
use ssh2::{Channel, Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

const PUMP_BUFFER: usize = 32 * 1024;
const IDLE_BACKOFF: Duration = Duration::from_millis(2);

/// Handle on a running relay; stopping it joins the pump thread
pub struct Bridge {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Connect `channel` to a fresh loopback socket and start relaying
    ///
    /// Returns the socket the VM session should use as its transport. The
    /// bastion session is switched to non-blocking mode; nothing else may
    /// use it while the relay runs.
    pub fn spawn(session: &Session, channel: Channel) -> Result<(TcpStream, Bridge)> {
        let listener =
            TcpListener::bind(("127.0.0.1", 0)).context("Failed to bind loopback relay")?;
        let addr = listener.local_addr()?;
        let client = TcpStream::connect(addr).context("Failed to connect loopback relay")?;
        let (server, peer) = listener.accept().context("Failed to accept loopback relay")?;
        drop(listener);

        if peer != client.local_addr()? {
            anyhow::bail!("Unexpected peer {} on loopback relay", peer);
        }

        server.set_nonblocking(true)?;
        server.set_nodelay(true)?;
        client.set_nodelay(true)?;
        session.set_blocking(false);

        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name("bastion-relay".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                move || pump(channel, server, &stop)
            })
            .context("Failed to spawn relay thread")?;

        Ok((
            client,
            Bridge {
                stop,
                handle: Some(handle),
            },
        ))
    }

    /// Stop relaying and wait for the pump thread to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("Relay thread panicked");
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bytes read from one side and not yet written to the other
#[derive(Default)]
struct Pending {
    buf: Vec<u8>,
    pos: usize,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn fill(&mut self, bytes: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        self.pos = 0;
    }

    fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }
}

enum Step {
    Progress,
    Idle,
    Done,
}

fn read_into(reader: &mut impl Read, pending: &mut Pending, buf: &mut [u8]) -> Step {
    if !pending.is_empty() {
        return Step::Idle;
    }
    match reader.read(buf) {
        Ok(0) => Step::Done,
        Ok(n) => {
            pending.fill(&buf[..n]);
            Step::Progress
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
            Step::Idle
        }
        Err(e) => {
            trace!(error = %e, "Relay read failed");
            Step::Done
        }
    }
}

fn write_from(writer: &mut impl Write, pending: &mut Pending) -> Step {
    if pending.is_empty() {
        return Step::Idle;
    }
    match writer.write(pending.remaining()) {
        Ok(0) => Step::Idle,
        Ok(n) => {
            pending.advance(n);
            Step::Progress
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
            Step::Idle
        }
        Err(e) => {
            trace!(error = %e, "Relay write failed");
            Step::Done
        }
    }
}

fn pump(mut channel: Channel, mut socket: TcpStream, stop: &AtomicBool) {
    let mut buf = vec![0u8; PUMP_BUFFER];
    let mut upstream = Pending::default();
    let mut downstream = Pending::default();

    'relay: while !stop.load(Ordering::Relaxed) {
        let mut progressed = false;

        for step in [
            read_into(&mut socket, &mut upstream, &mut buf),
            write_from(&mut channel, &mut upstream),
        ] {
            match step {
                Step::Progress => progressed = true,
                Step::Idle => {}
                Step::Done => break 'relay,
            }
        }

        match read_into(&mut channel, &mut downstream, &mut buf) {
            Step::Progress => progressed = true,
            Step::Idle => {}
            Step::Done if channel.eof() => break 'relay,
            Step::Done => {}
        }
        match write_from(&mut socket, &mut downstream) {
            Step::Progress => progressed = true,
            Step::Idle => {}
            Step::Done => break 'relay,
        }

        if !progressed {
            thread::sleep(IDLE_BACKOFF);
        }
    }

    let _ = socket.shutdown(Shutdown::Both);
    let _ = channel.close();
    debug!("Bastion relay stopped");
}
