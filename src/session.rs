//! Session configuration and lifecycle.
//!
//! A session owns one ICMP channel and runs two threads: the tick path
//! (`sender`) sends probes and sweeps timeouts, the receive path
//! (`listener`) resolves replies. Both feed outcomes through
//! [`SessionContext::record`].

use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::correlator::{Correlator, Outcome};
use crate::error::ConfigError;
use crate::listener::PacketListener;
use crate::messages::{Sample, SessionEvent, Summary};
use crate::metrics::MetricsSink;
use crate::packet::MAX_PAYLOAD_SIZE;
use crate::sender::PacketSender;
use crate::stats::Aggregator;
use crate::transport::{ProbeSender, ReplyReceiver};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PAYLOAD_SIZE: usize = 24;

/// Upper bound on how long the receive path blocks in one read.
pub const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parameters of one probing session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target as given by the user; used as the metric label.
    pub target: String,
    pub address: IpAddr,
    pub interval: Duration,
    /// Per-probe timeout after which a probe counts as lost.
    pub timeout: Duration,
    /// `None` probes until stopped.
    pub count: Option<u64>,
    /// Total run time after which the session drains on its own.
    pub deadline: Option<Duration>,
    pub payload_size: usize,
    pub identifier: u16,
    pub tracker: u64,
}

impl SessionConfig {
    pub fn new(target: impl Into<String>, address: IpAddr) -> Self {
        SessionConfig {
            target: target.into(),
            address,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            count: None,
            deadline: None,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            identifier: rand::random(),
            tracker: rand::random(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Negative counts mean "unbounded".
    pub fn with_count(mut self, count: i64) -> Self {
        self.count = u64::try_from(count).ok();
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_tracker(mut self, tracker: u64) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::PayloadTooLarge(self.payload_size));
        }
        Ok(())
    }

    pub(crate) fn receive_poll(&self) -> Duration {
        self.interval.min(RECEIVE_POLL_INTERVAL)
    }
}

/// Where the prober loop is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Single-fire stop signal that waiters can block on with a deadline.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Returns `true` only for the call that actually cancelled.
    pub fn cancel(&self) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut cancelled = lock(flag);
        if *cancelled {
            return false;
        }
        *cancelled = true;
        condvar.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Sleeps for `timeout` unless cancelled first. Returns whether the
    /// token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let guard = lock(flag);
        let (cancelled, _) = condvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled
    }
}

/// State shared by the tick and receive paths of a running session.
pub(crate) struct SessionContext {
    pub config: SessionConfig,
    correlator: Mutex<Correlator>,
    aggregator: Arc<Aggregator>,
    pub cancel: CancellationToken,
    state: Arc<Mutex<LoopState>>,
    receiving: AtomicBool,
    sink: Arc<dyn MetricsSink>,
    observers: Vec<Sender<SessionEvent>>,
}

impl SessionContext {
    pub fn correlator(&self) -> MutexGuard<'_, Correlator> {
        lock(&self.correlator)
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::Acquire)
    }

    pub fn set_state(&self, state: LoopState) {
        *lock(&self.state) = state;
    }

    /// Applies an outcome to the statistics, the metrics sink and observers.
    pub fn record(&self, outcome: Outcome) {
        self.aggregator.update(&outcome);

        let event = match outcome {
            Outcome::Success { sequence, rtt, bytes, source } => {
                let sample = Sample { target: self.config.target.clone(), sequence, bytes, source, rtt };
                if let Err(e) = self.sink.set(&sample.target, sample.rtt_millis()) {
                    warn!("icmp_seq={}: {}", sequence, e);
                }
                SessionEvent::Reply(sample)
            }
            Outcome::Lost { sequence } => {
                debug!("icmp_seq={} lost", sequence);
                SessionEvent::Lost { sequence }
            }
        };
        self.emit(event);
    }

    /// Records every probe older than the timeout as lost.
    pub fn sweep(&self, now: Instant) {
        let lost = self.correlator().sweep_timeouts(now, self.config.timeout);
        for outcome in lost {
            self.record(outcome);
        }
    }

    fn emit(&self, event: SessionEvent) {
        for observer in &self.observers {
            // observers that hung up are simply skipped
            let _ = observer.send(event.clone());
        }
    }
}

/// A configured, not yet started session.
pub struct Session {
    config: SessionConfig,
    sink: Arc<dyn MetricsSink>,
    aggregator: Arc<Aggregator>,
    observers: Vec<Sender<SessionEvent>>,
    controller: SessionController,
}

impl Session {
    pub fn new(config: SessionConfig, sink: Arc<dyn MetricsSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Session {
            config,
            sink,
            aggregator: Arc::new(Aggregator::new()),
            observers: Vec::new(),
            controller: SessionController {
                cancel: CancellationToken::new(),
                state: Arc::new(Mutex::new(LoopState::Idle)),
            },
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stop switch that is already usable before [`Session::start`]. A stop
    /// requested before start makes the session finish without sending.
    pub fn controller(&self) -> SessionController {
        self.controller.clone()
    }

    /// Registers an observer. Every event of the session is delivered to it,
    /// ending with [`SessionEvent::Finished`].
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.observers.push(tx);
        rx
    }

    /// Live statistics, readable while the session runs.
    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Launches the prober loop on its own threads.
    pub fn start<S, R>(self, sender: S, receiver: R) -> io::Result<SessionHandle>
    where
        S: ProbeSender + 'static,
        R: ReplyReceiver + 'static,
    {
        let controller = self.controller;
        let ctx = Arc::new(SessionContext {
            correlator: Mutex::new(Correlator::new(self.config.identifier)),
            config: self.config,
            aggregator: Arc::clone(&self.aggregator),
            cancel: controller.cancel.clone(),
            state: Arc::clone(&controller.state),
            receiving: AtomicBool::new(true),
            sink: self.sink,
            observers: self.observers,
        });

        let listener = PacketListener::start(Arc::clone(&ctx), receiver)?;
        let session_ctx = Arc::clone(&ctx);
        let thread = thread::Builder::new()
            .name("ping-sender".to_string())
            .spawn(move || run_session(session_ctx, sender, listener))
            .inspect_err(|_| ctx.receiving.store(false, Ordering::Release))?;

        Ok(SessionHandle {
            controller,
            aggregator: self.aggregator,
            thread,
        })
    }
}

/// Cloneable stop switch for a running session.
#[derive(Debug, Clone)]
pub struct SessionController {
    cancel: CancellationToken,
    state: Arc<Mutex<LoopState>>,
}

impl SessionController {
    /// Asks the session to drain and stop. Safe to call any number of times
    /// from any thread; only the first call has an effect.
    pub fn stop(&self) {
        if self.cancel.cancel() {
            info!("stop requested");
        }
    }

    pub fn state(&self) -> LoopState {
        *lock(&self.state)
    }
}

pub struct SessionHandle {
    controller: SessionController,
    aggregator: Arc<Aggregator>,
    thread: JoinHandle<Summary>,
}

impl SessionHandle {
    pub fn controller(&self) -> SessionController {
        self.controller.clone()
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn state(&self) -> LoopState {
        self.controller.state()
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the session has stopped and returns its final statistics.
    pub fn wait(self) -> Summary {
        match self.thread.join() {
            Ok(summary) => summary,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

fn run_session<S: ProbeSender>(ctx: Arc<SessionContext>, sender: S, listener: JoinHandle<()>) -> Summary {
    ctx.set_state(LoopState::Running);
    info!(
        "pinging {} ({}) every {:?}, timeout {:?}, identifier {}",
        ctx.config.target, ctx.config.address, ctx.config.interval, ctx.config.timeout, ctx.config.identifier
    );

    let transmitted = PacketSender::new(Arc::clone(&ctx), sender).run();

    ctx.set_state(LoopState::Draining);
    debug!("draining after {} probes, {} in flight", transmitted, ctx.correlator().in_flight());
    drain(&ctx);

    ctx.receiving.store(false, Ordering::Release);
    if listener.join().is_err() {
        warn!("receive thread panicked");
    }

    ctx.set_state(LoopState::Stopped);
    let summary = Summary::new(ctx.config.target.clone(), ctx.config.address, &ctx.aggregator.snapshot());
    ctx.emit(SessionEvent::Finished(summary.clone()));
    summary
}

/// Waits up to one timeout for in-flight probes, then gives up on the rest.
fn drain(ctx: &SessionContext) {
    let started = Instant::now();
    let poll = ctx.config.receive_poll();

    loop {
        let now = Instant::now();
        ctx.sweep(now);
        let waited = now.saturating_duration_since(started);
        if ctx.correlator().is_idle() || waited >= ctx.config.timeout {
            break;
        }
        thread::sleep(poll.min(ctx.config.timeout - waited));
    }

    let remaining = ctx.correlator().drain();
    for outcome in remaining {
        ctx.record(outcome);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
