//! Scripted fakes for the transport and scorer seams
//!
//! Compiled for unit tests and, with the `testing` feature, for other crates'
//! integration tests.

use crate::error::{ScoreError, TunnelStage};
use crate::exec::{CommandRunner, RemoteCommandExecutor, RemoteSession, StreamEvent};
use crate::inventory::{BastionConfig, TimeoutConfig, VmAccessConfig, VmRegistry};
use crate::models::PredictionInput;
use crate::predictor::{Scorer, Verdict};
use crate::tunnel::{SshTransport, TunnelManager};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;
use tokio::sync::mpsc;

type Responder = dyn Fn(&str) -> Vec<StreamEvent> + Send + Sync;

#[derive(Default)]
struct Counters {
    bastion_attempts: AtomicUsize,
    bastion_closes: AtomicUsize,
    sessions_opened: AtomicUsize,
    session_closes: AtomicUsize,
}

/// [`SshTransport`] that records every call and answers from a script
///
/// Clones share their counters, so a test can keep one while the
/// [`TunnelManager`] owns another.
#[derive(Clone)]
pub struct FakeTransport {
    fail_at: Option<TunnelStage>,
    connect_delay: Duration,
    hang: bool,
    responder: Arc<Responder>,
    counters: Arc<Counters>,
    forwards: Arc<Mutex<Vec<String>>>,
    commands: Arc<Mutex<Vec<String>>>,
    parked: Arc<Mutex<Vec<mpsc::Sender<StreamEvent>>>>,
    close_threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    /// Every leg succeeds; commands close immediately with no output
    pub fn new() -> Self {
        Self {
            fail_at: None,
            connect_delay: Duration::ZERO,
            hang: false,
            responder: Arc::new(|_| vec![StreamEvent::Closed]),
            counters: Arc::new(Counters::default()),
            forwards: Arc::new(Mutex::new(Vec::new())),
            commands: Arc::new(Mutex::new(Vec::new())),
            parked: Arc::new(Mutex::new(Vec::new())),
            close_threads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the handshake at `stage`
    pub fn failing_at(stage: TunnelStage) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::new()
        }
    }

    /// Block in the bastion leg for `delay`
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Answer each command with the events `responder` returns for it
    pub fn respond<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Vec<StreamEvent> + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// Reply to stdout with `body` for every command
    pub fn respond_stdout(self, body: &str) -> Self {
        let body = body.as_bytes().to_vec();
        self.respond(move |_| vec![StreamEvent::Stdout(body.clone()), StreamEvent::Closed])
    }

    /// Started commands never produce output nor close
    pub fn hang_on_exec(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn bastion_attempts(&self) -> usize {
        self.counters.bastion_attempts.load(Ordering::SeqCst)
    }

    pub fn bastion_closes(&self) -> usize {
        self.counters.bastion_closes.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.counters.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn session_closes(&self) -> usize {
        self.counters.session_closes.load(Ordering::SeqCst)
    }

    /// `host:port` of every forward requested
    pub fn forwards(&self) -> Vec<String> {
        self.forwards.lock().unwrap().clone()
    }

    /// Every command line sent, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Thread that ran each leg close, sessions and bastions alike
    pub fn close_threads(&self) -> Vec<ThreadId> {
        self.close_threads.lock().unwrap().clone()
    }

    fn fails_at(&self, stage: TunnelStage) -> bool {
        self.fail_at == Some(stage)
    }
}

pub struct FakeBastion;

pub struct FakeForward;

pub struct FakeSession {
    hang: bool,
    responder: Arc<Responder>,
    commands: Arc<Mutex<Vec<String>>>,
    parked: Arc<Mutex<Vec<mpsc::Sender<StreamEvent>>>>,
}

impl SshTransport for FakeTransport {
    type Bastion = FakeBastion;
    type Forward = FakeForward;
    type Session = FakeSession;

    fn connect_bastion(&self, _bastion: &BastionConfig) -> anyhow::Result<FakeBastion> {
        self.counters.bastion_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            std::thread::sleep(self.connect_delay);
        }
        if self.fails_at(TunnelStage::Bastion) {
            anyhow::bail!("connection refused");
        }
        Ok(FakeBastion)
    }

    fn forward(&self, _bastion: &mut FakeBastion, host: &str, port: u16) -> anyhow::Result<FakeForward> {
        self.forwards
            .lock()
            .unwrap()
            .push(format!("{}:{}", host, port));
        if self.fails_at(TunnelStage::Forward) {
            anyhow::bail!("administratively prohibited");
        }
        Ok(FakeForward)
    }

    fn connect_vm(
        &self,
        _forward: FakeForward,
        _host: &str,
        _access: &VmAccessConfig,
    ) -> anyhow::Result<FakeSession> {
        if self.fails_at(TunnelStage::VmAuth) {
            anyhow::bail!("publickey denied");
        }
        self.counters.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            hang: self.hang,
            responder: Arc::clone(&self.responder),
            commands: Arc::clone(&self.commands),
            parked: Arc::clone(&self.parked),
        })
    }

    fn close_session(&self, _session: FakeSession) {
        self.close_threads.lock().unwrap().push(std::thread::current().id());
        self.counters.session_closes.fetch_add(1, Ordering::SeqCst);
    }

    fn close_bastion(&self, _bastion: FakeBastion) {
        self.close_threads.lock().unwrap().push(std::thread::current().id());
        self.counters.bastion_closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl RemoteSession for FakeSession {
    fn exec(&mut self, command: &str) -> mpsc::Receiver<StreamEvent> {
        self.commands.lock().unwrap().push(command.to_string());

        if self.hang {
            let (tx, rx) = mpsc::channel(1);
            self.parked.lock().unwrap().push(tx);
            return rx;
        }

        let events = (self.responder)(command);
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.try_send(event);
        }
        rx
    }
}

type Verdicts = dyn Fn(&PredictionInput) -> Result<Verdict, ScoreError> + Send + Sync;
type Delays = dyn Fn(&PredictionInput) -> Duration + Send + Sync;

/// [`Scorer`] answering from a closure and counting calls
#[derive(Clone)]
pub struct FakeScorer {
    verdicts: Arc<Verdicts>,
    delays: Arc<Delays>,
    calls: Arc<AtomicUsize>,
}

impl FakeScorer {
    pub fn new<F>(verdicts: F) -> Self
    where
        F: Fn(&PredictionInput) -> Result<Verdict, ScoreError> + Send + Sync + 'static,
    {
        Self {
            verdicts: Arc::new(verdicts),
            delays: Arc::new(|_| Duration::ZERO),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep for `delay(input)` before answering
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&PredictionInput) -> Duration + Send + Sync + 'static,
    {
        self.delays = Arc::new(delay);
        self
    }

    /// Always returns `verdict`
    pub fn always(verdict: Verdict) -> Self {
        Self::new(move |_| Ok(verdict))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scorer for FakeScorer {
    async fn score(&self, input: &PredictionInput) -> Result<Verdict, ScoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = (self.delays)(input);
        if delay.is_zero() {
            // Yield so concurrent scores interleave.
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        (self.verdicts)(input)
    }
}

/// Poll `condition` for up to a second
///
/// For effects that land on a blocking-pool thread after the awaited call
/// has returned.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..50 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

pub fn test_registry() -> VmRegistry {
    [("vm1", "192.168.5.50"), ("vm2", "192.168.5.27")]
        .into_iter()
        .collect()
}

pub fn test_bastion() -> BastionConfig {
    BastionConfig {
        host: "bastion.test".to_string(),
        port: 22,
        user: "cc".to_string(),
        identity_file: PathBuf::from("/keys/bastion.pem"),
    }
}

pub fn test_access() -> VmAccessConfig {
    VmAccessConfig {
        user: "cc".to_string(),
        port: 22,
        identity_file: PathBuf::from("/keys/vm.pem"),
    }
}

pub fn test_manager(transport: FakeTransport) -> TunnelManager<FakeTransport> {
    TunnelManager::new(
        transport,
        test_registry(),
        test_bastion(),
        test_access(),
        TimeoutConfig::default(),
    )
}

pub fn test_runner(transport: FakeTransport) -> CommandRunner<FakeTransport> {
    CommandRunner::new(
        test_manager(transport),
        RemoteCommandExecutor::new(Duration::from_secs(5)),
    )
}

/// Three healthy `docker stats` lines around one malformed line
pub const STATS_OUTPUT: &str = concat!(
    r#"{"BlockIO":"0B / 0B","CPUPerc":"0.50%","Container":"a1","ID":"a1","MemPerc":"2.00%","MemUsage":"40MiB / 1.944GiB","Name":"web","NetIO":"1kB / 0B","PIDs":"3"}"#,
    "\n",
    r#"{"BlockIO":"0B / 0B","CPUPerc":"98.00%","Container":"b2","ID":"b2","MemPerc":"90.00%","MemUsage":"1.75GiB / 1.944GiB","Name":"miner","NetIO":"0B / 0B","PIDs":"64"}"#,
    "\n",
    "{\"ID\":\"c3\",\"Name\":\"trunc\n",
    r#"{"BlockIO":"0B / 0B","CPUPerc":"1.00%","Container":"d4","ID":"d4","MemPerc":"5.00%","MemUsage":"100MiB / 1.944GiB","Name":"db","NetIO":"0B / 0B","PIDs":"12"}"#,
    "\n",
);
