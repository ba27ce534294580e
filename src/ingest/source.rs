//! Frame source state machine.
//!
//! Two acquisition strategies share one contract (`FrameSource`):
//! - `StreamSource`: continuous blocking reads from a `StreamReader`, with
//!   release-and-reconnect on any failed or empty read.
//! - `PollSource`: request/response polling of a `SnapshotFetcher` on a fixed
//!   cadence, backing off while the endpoint is unreachable.
//!
//! Both publish into a `BoundedLatestQueue` handed over at construction and
//! observe a shared running flag at least once per iteration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::config::ReceiveSettings;
use crate::frame::Frame;
use crate::queue::BoundedLatestQueue;

const STOP_POLL_SLICE: Duration = Duration::from_millis(50);

/// Connection state of one source. Owned by the source itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// A continuous media read handle (e.g. an RTSP decode pipeline).
pub trait StreamReader: Send {
    /// Human-readable source address for logs.
    fn describe(&self) -> String;

    /// Open the link. Called again after every `release`.
    fn open(&mut self) -> Result<()>;

    /// Blocking read bounded by `timeout`. `Ok(None)` is an empty or invalid
    /// read and is treated as a lost connection.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>>;

    /// Drop any held handle. Must be safe to call when nothing is open.
    fn release(&mut self);
}

/// A request/response image endpoint.
pub trait SnapshotFetcher: Send {
    fn describe(&self) -> String;

    /// Prepare the client. Poll sources only record readiness here.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// One exchange. `Err` is a transport failure; `Ok(None)` means the
    /// endpoint answered without an image.
    fn fetch(&mut self) -> Result<Option<Frame>>;
}

/// Producer contract shared by every acquisition strategy.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Establish the external link: Disconnected -> Connecting ->
    /// {Connected | Failed}. Failure is logged, never fatal.
    fn connect(&mut self) -> ConnectionState;

    /// Acquisition loop. Returns after `stop` is observed, with any held
    /// handle released.
    fn run(&mut self);

    /// Request the loop to stop. Idempotent, and safe before `run` starts.
    fn stop(&self) {
        self.running_flag().store(false, Ordering::SeqCst);
    }

    fn running_flag(&self) -> Arc<AtomicBool>;

    fn counters(&self) -> Arc<SourceCounters>;
}

/// Live counters of a source, readable from other threads.
#[derive(Default, Debug)]
pub struct SourceCounters {
    frames_captured: AtomicU64,
    losses: AtomicU64,
    connect_attempts: AtomicU64,
}

impl SourceCounters {
    pub fn snapshot(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            losses: self.losses.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for a source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    /// Connectivity losses; each one is warned about exactly once.
    pub losses: u64,
    pub connect_attempts: u64,
}

type StateObserver = Box<dyn FnMut(ConnectionState) + Send>;

/// Sleep for `duration` in short slices. Returns false if the flag was
/// cleared meanwhile.
fn sleep_while_running(running: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(STOP_POLL_SLICE.min(deadline - now));
    }
}

// ----------------------------------------------------------------------------
// Continuous-read source
// ----------------------------------------------------------------------------

pub struct StreamSource<R: StreamReader> {
    name: String,
    reader: R,
    queue: BoundedLatestQueue<Frame>,
    state: ConnectionState,
    running: Arc<AtomicBool>,
    counters: Arc<SourceCounters>,
    reconnect_backoff: Duration,
    read_timeout: Duration,
    /// Bound for the first read after each open, which also covers stream
    /// negotiation and waiting for a keyframe.
    first_read_timeout: Duration,
    awaiting_first_frame: bool,
    observer: Option<StateObserver>,
    /// Set from the first failure until a frame is read again; suppresses
    /// repeated warnings.
    in_outage: bool,
    sequence: u64,
}

impl<R: StreamReader> StreamSource<R> {
    pub fn new(reader: R, queue: BoundedLatestQueue<Frame>) -> Self {
        Self {
            name: "StreamSource".to_string(),
            reader,
            queue,
            state: ConnectionState::Disconnected,
            running: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(SourceCounters::default()),
            reconnect_backoff: Duration::from_secs(3),
            read_timeout: Duration::from_secs(2),
            first_read_timeout: Duration::from_secs(10),
            awaiting_first_frame: false,
            observer: None,
            in_outage: false,
            sequence: 0,
        }
    }

    pub fn from_settings(
        reader: R,
        queue: BoundedLatestQueue<Frame>,
        settings: &ReceiveSettings,
    ) -> Self {
        Self::new(reader, queue)
            .with_backoff(settings.reconnect_backoff)
            .with_read_timeout(settings.read_timeout)
            .with_first_read_timeout(settings.first_read_timeout)
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Timeout of the first read after every (re)connect. Never shorter
    /// than the regular read timeout.
    pub fn with_first_read_timeout(mut self, timeout: Duration) -> Self {
        self.first_read_timeout = timeout;
        self
    }

    fn next_read_timeout(&self) -> Duration {
        if self.awaiting_first_frame {
            self.first_read_timeout.max(self.read_timeout)
        } else {
            self.read_timeout
        }
    }

    /// Observe every state transition (diagnostics and tests).
    pub fn with_observer(mut self, observer: impl FnMut(ConnectionState) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Some(observer) = self.observer.as_mut() {
            observer(state);
        }
    }

    /// Release the handle after a failed read. Only the first failure of an
    /// outage is warned about and counted.
    fn lose_connection(&mut self, reason: &str) {
        if self.in_outage {
            log::debug!("{}: still unavailable ({})", self.name, reason);
        } else {
            self.counters.losses.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "{}: stream {} lost ({}); reconnecting every {:?}",
                self.name,
                self.reader.describe(),
                reason,
                self.reconnect_backoff
            );
            self.in_outage = true;
        }
        self.reader.release();
        self.set_state(ConnectionState::Disconnected);
    }

    fn frame_received(&mut self, frame: Frame) {
        self.awaiting_first_frame = false;
        if self.in_outage {
            log::info!("{}: frames resumed from {}", self.name, self.reader.describe());
            self.in_outage = false;
        }
        self.sequence += 1;
        self.queue.push(frame.with_sequence(self.sequence));
        self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);
        log::trace!("{}: frame {} queued", self.name, self.sequence);
    }
}

impl<R: StreamReader> FrameSource for StreamSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> ConnectionState {
        self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.reader.release();
        self.set_state(ConnectionState::Connecting);
        match self.reader.open() {
            Ok(()) => {
                if self.in_outage {
                    log::debug!("{}: reopened {}", self.name, self.reader.describe());
                } else {
                    log::info!("{}: connected to {}", self.name, self.reader.describe());
                }
                self.awaiting_first_frame = true;
                self.set_state(ConnectionState::Connected);
            }
            Err(e) => {
                if self.in_outage {
                    log::debug!("{}: reconnect attempt failed: {:#}", self.name, e);
                } else {
                    self.counters.losses.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "{}: connection to {} failed: {:#}",
                        self.name,
                        self.reader.describe(),
                        e
                    );
                    self.in_outage = true;
                }
                self.reader.release();
                self.set_state(ConnectionState::Failed);
            }
        }
        self.state
    }

    fn run(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.connect();
        }

        while self.running.load(Ordering::SeqCst) {
            if self.state != ConnectionState::Connected {
                if !sleep_while_running(&self.running, self.reconnect_backoff) {
                    break;
                }
                self.connect();
                continue;
            }

            match self.reader.read_frame(self.next_read_timeout()) {
                Ok(Some(frame)) if !frame.is_empty() => self.frame_received(frame),
                Ok(_) => self.lose_connection("empty frame received"),
                Err(e) => self.lose_connection(&format!("{:#}", e)),
            }
        }

        self.reader.release();
        self.set_state(ConnectionState::Disconnected);
        log::info!("{}: stopped cleanly", self.name);
    }

    fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn counters(&self) -> Arc<SourceCounters> {
        self.counters.clone()
    }
}

// ----------------------------------------------------------------------------
// Poll source
// ----------------------------------------------------------------------------

/// What the last poll looked like; logs fire only when this changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PollHealth {
    Unknown,
    Serving,
    NoImage,
    Unreachable,
}

pub struct PollSource<F: SnapshotFetcher> {
    name: String,
    fetcher: F,
    queue: BoundedLatestQueue<Frame>,
    state: ConnectionState,
    running: Arc<AtomicBool>,
    counters: Arc<SourceCounters>,
    interval: Duration,
    backoff: Duration,
    observer: Option<StateObserver>,
    health: PollHealth,
    sequence: u64,
}

impl<F: SnapshotFetcher> PollSource<F> {
    pub fn new(fetcher: F, queue: BoundedLatestQueue<Frame>) -> Self {
        Self {
            name: "PollSource".to_string(),
            fetcher,
            queue,
            state: ConnectionState::Disconnected,
            running: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(SourceCounters::default()),
            interval: Duration::from_secs(1),
            backoff: Duration::from_secs(3),
            observer: None,
            health: PollHealth::Unknown,
            sequence: 0,
        }
    }

    pub fn from_settings(
        fetcher: F,
        queue: BoundedLatestQueue<Frame>,
        settings: &ReceiveSettings,
    ) -> Self {
        Self::new(fetcher, queue).with_cadence(settings.poll_interval, settings.poll_backoff)
    }

    /// Nominal poll interval and the longer interval used while unreachable.
    pub fn with_cadence(mut self, interval: Duration, backoff: Duration) -> Self {
        self.interval = interval;
        self.backoff = backoff;
        self
    }

    pub fn with_observer(mut self, observer: impl FnMut(ConnectionState) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Some(observer) = self.observer.as_mut() {
            observer(state);
        }
    }

    fn set_health(&mut self, health: PollHealth, detail: Option<&anyhow::Error>) {
        if self.health == health {
            return;
        }
        let previous = self.health;
        self.health = health;
        match health {
            PollHealth::Serving if previous == PollHealth::Unreachable => {
                log::info!("{}: {} reachable again", self.name, self.fetcher.describe());
            }
            PollHealth::Serving => {
                log::debug!("{}: receiving images from {}", self.name, self.fetcher.describe());
            }
            PollHealth::NoImage => {
                log::warn!(
                    "{}: {} answered without an image",
                    self.name,
                    self.fetcher.describe()
                );
            }
            PollHealth::Unreachable => {
                self.counters.losses.fetch_add(1, Ordering::Relaxed);
                let reason = detail.map(|e| format!("{:#}", e)).unwrap_or_default();
                log::warn!(
                    "{}: {} unreachable ({}); polling every {:?} until it recovers",
                    self.name,
                    self.fetcher.describe(),
                    reason,
                    self.backoff
                );
            }
            PollHealth::Unknown => {}
        }
    }

    /// One exchange; returns the delay before the next one.
    fn poll_once(&mut self) -> Duration {
        match self.fetcher.fetch() {
            Ok(Some(frame)) if !frame.is_empty() => {
                self.set_state(ConnectionState::Connected);
                self.set_health(PollHealth::Serving, None);
                self.sequence += 1;
                self.queue.push(frame.with_sequence(self.sequence));
                self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                self.interval
            }
            Ok(_) => {
                self.set_state(ConnectionState::Connected);
                self.set_health(PollHealth::NoImage, None);
                self.interval
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                self.set_health(PollHealth::Unreachable, Some(&e));
                self.backoff
            }
        }
    }
}

impl<F: SnapshotFetcher> FrameSource for PollSource<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> ConnectionState {
        self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Connecting);
        match self.fetcher.prepare() {
            Ok(()) => {
                log::info!(
                    "{}: starting to poll images from {}",
                    self.name,
                    self.fetcher.describe()
                );
                self.set_state(ConnectionState::Connected);
            }
            Err(e) => {
                log::warn!("{}: poll client setup failed: {:#}", self.name, e);
                self.set_state(ConnectionState::Failed);
            }
        }
        self.state
    }

    fn run(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.connect();
        }

        while self.running.load(Ordering::SeqCst) {
            let delay = if self.state == ConnectionState::Failed {
                self.connect();
                self.backoff
            } else {
                self.poll_once()
            };
            if !sleep_while_running(&self.running, delay) {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        log::info!("{}: stopped cleanly", self.name);
    }

    fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn counters(&self) -> Arc<SourceCounters> {
        self.counters.clone()
    }
}

// ----------------------------------------------------------------------------
// Thread handle
// ----------------------------------------------------------------------------

/// Owns the thread running a source.
pub struct SourceHandle {
    name: String,
    running: Arc<AtomicBool>,
    counters: Arc<SourceCounters>,
    join: Option<JoinHandle<()>>,
}

impl SourceHandle {
    /// Start `source` on its own thread.
    pub fn spawn(mut source: Box<dyn FrameSource>) -> Result<Self> {
        let name = source.name().to_string();
        let running = source.running_flag();
        let counters = source.counters();
        let join = std::thread::Builder::new()
            .name(name.to_lowercase())
            .spawn(move || source.run())
            .with_context(|| format!("spawn {} thread", name))?;
        Ok(Self {
            name,
            running,
            counters,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the source to stop. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        log::debug!("{}: stop signal received", self.name);
    }

    pub fn stats(&self) -> SourceStats {
        self.counters.snapshot()
    }

    /// Wait for the source thread to exit.
    pub fn join(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("{} thread panicked", self.name))?;
        }
        Ok(())
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
