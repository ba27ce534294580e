//! Frame router.
//!
//! Single consumer of the inbound queue. Per frame: detect once, publish the
//! detector's visualization to `detections`, then crop each region and hand
//! it to the task its label resolves to. Every failure is confined to the
//! region or frame that caused it.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::config::DETECTIONS_CHANNEL;
use crate::detect::Detector;
use crate::frame::{Frame, Region};
use crate::queue::BoundedLatestQueue;
use crate::render::{result_canvas, TextRenderer, TEXT_COLOR};
use crate::tasks::{OutputStyle, TaskBackend, TaskOutcome, TaskRegistry};

/// Inbound pop timeout; also the cancellation check interval.
pub const POP_TIMEOUT: Duration = Duration::from_secs(1);

struct ChannelSink {
    queue: BoundedLatestQueue<Frame>,
    width: u32,
    height: u32,
}

/// Write side of every output channel, keyed by name.
#[derive(Clone, Default)]
pub struct OutputChannels {
    sinks: HashMap<String, Arc<ChannelSink>>,
}

impl OutputChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, queue: BoundedLatestQueue<Frame>, width: u32, height: u32) {
        self.sinks.insert(
            name.to_string(),
            Arc::new(ChannelSink {
                queue,
                width,
                height,
            }),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sinks.contains_key(name)
    }

    /// Resize `frame` to the channel's resolution and push it. No-op for an
    /// absent or empty frame, or an unknown channel. Returns whether a frame
    /// was published.
    pub fn push_to_channel(&self, name: &str, frame: Option<&Frame>) -> bool {
        let Some(frame) = frame.filter(|f| !f.is_empty()) else {
            return false;
        };
        let Some(sink) = self.sinks.get(name) else {
            log::debug!("FrameRouter: no output channel '{}'", name);
            return false;
        };
        sink.queue.push(frame.resized(sink.width, sink.height));
        true
    }
}

/// What happened to one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// The detector produced a usable result.
    pub detected: bool,
    pub regions: usize,
    /// Regions whose task ran and whose result was published.
    pub dispatched: usize,
    /// Degenerate crops or regions with no resolvable task.
    pub skipped: usize,
    /// Regions whose task or rendering failed.
    pub failed: usize,
}

#[derive(Default, Debug)]
struct RouterCounters {
    frames_routed: AtomicU64,
    frames_skipped: AtomicU64,
    regions_dispatched: AtomicU64,
    region_failures: AtomicU64,
}

/// Router statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub frames_routed: u64,
    /// Frames dropped because detection failed, panicked or had no result.
    pub frames_skipped: u64,
    pub regions_dispatched: u64,
    pub region_failures: u64,
}

impl RouterCounters {
    fn snapshot(&self) -> RouterStats {
        RouterStats {
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            regions_dispatched: self.regions_dispatched.load(Ordering::Relaxed),
            region_failures: self.region_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct FrameRouter {
    input: BoundedLatestQueue<Frame>,
    detector: Box<dyn Detector>,
    tasks: TaskRegistry,
    outputs: OutputChannels,
    renderer: Arc<TextRenderer>,
    running: Arc<AtomicBool>,
    counters: Arc<RouterCounters>,
    pop_timeout: Duration,
}

impl FrameRouter {
    pub fn new(
        input: BoundedLatestQueue<Frame>,
        detector: Box<dyn Detector>,
        tasks: TaskRegistry,
        outputs: OutputChannels,
        renderer: Arc<TextRenderer>,
    ) -> Self {
        Self {
            input,
            detector,
            tasks,
            outputs,
            renderer,
            running: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(RouterCounters::default()),
            pop_timeout: POP_TIMEOUT,
        }
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// Ask the loop to exit at its next timeout check. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stats(&self) -> RouterStats {
        self.counters.snapshot()
    }

    /// Route one frame.
    ///
    /// `Err` only for a detection failure; region-level errors and panics are
    /// logged, counted in the report and do not stop the remaining regions.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport> {
        let mut report = FrameReport::default();
        let detection = self
            .detector
            .detect(frame)
            .with_context(|| format!("{} detection failed", self.detector.name()))?;
        let Some(detection) = detection else {
            log::debug!("FrameRouter: frame {} had no usable detection", frame.sequence());
            return Ok(report);
        };
        report.detected = true;
        report.regions = detection.regions.len();

        self.outputs
            .push_to_channel(DETECTIONS_CHANNEL, Some(&detection.annotated));

        for region in &detection.regions {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.dispatch_region(frame, region)));
            match outcome {
                Ok(Ok(true)) => report.dispatched += 1,
                Ok(Ok(false)) => report.skipped += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    log::error!(
                        "FrameRouter: region '{}' {:?} failed: {:#}",
                        region.label,
                        region.bbox,
                        e
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    log::error!(
                        "FrameRouter: region '{}' {:?} panicked: {}",
                        region.label,
                        region.bbox,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        Ok(report)
    }

    /// Crop, run the resolved task, render and publish. `Ok(false)` when the
    /// region was skipped.
    fn dispatch_region(&mut self, frame: &Frame, region: &Region) -> Result<bool> {
        let Some(crop) = frame.crop(&region.bbox) else {
            log::debug!(
                "FrameRouter: skipping degenerate region '{}' {:?}",
                region.label,
                region.bbox
            );
            return Ok(false);
        };
        let Some(resolution) = self.tasks.resolve(&region.label) else {
            log::debug!("FrameRouter: no task for label '{}'", region.label);
            return Ok(false);
        };
        let task_name = resolution.task().to_string();
        log::debug!(
            "FrameRouter: {} -> {} ({:?})",
            region.label,
            task_name,
            resolution
        );

        let task = self
            .tasks
            .get_mut(&task_name)
            .ok_or_else(|| anyhow!("task '{}' vanished from registry", task_name))?;
        let outcome = task
            .execute(&crop)
            .with_context(|| format!("task '{}'", task_name))?;
        let rendered = render_outcome(task, &crop, &outcome, &self.renderer);
        self.outputs.push_to_channel(&task_name, Some(&rendered));
        Ok(true)
    }

    /// One loop iteration. Returns whether a frame was popped.
    pub fn run_once(&mut self) -> bool {
        let Some(frame) = self.input.pop(self.pop_timeout) else {
            return false;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process_frame(&frame)));
        match result {
            Ok(Ok(report)) => {
                if report.detected {
                    self.counters.frames_routed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
                }
                self.counters
                    .regions_dispatched
                    .fetch_add(report.dispatched as u64, Ordering::Relaxed);
                self.counters
                    .region_failures
                    .fetch_add(report.failed as u64, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
                log::error!("FrameRouter: frame {} skipped: {:#}", frame.sequence(), e);
            }
            Err(panic) => {
                self.counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "FrameRouter: frame {} panicked: {}",
                    frame.sequence(),
                    panic_message(panic.as_ref())
                );
            }
        }
        true
    }

    /// Loop until stopped.
    pub fn run(&mut self) {
        log::info!(
            "FrameRouter: started (detector {}, tasks {:?})",
            self.detector.name(),
            self.tasks.list()
        );
        while self.running.load(Ordering::SeqCst) {
            self.run_once();
        }
        log::info!("FrameRouter: stopped cleanly");
    }
}

/// Render a task outcome in the task's output style.
fn render_outcome(
    task: &dyn TaskBackend,
    crop: &Frame,
    outcome: &TaskOutcome,
    renderer: &TextRenderer,
) -> Frame {
    let caption = task.caption(outcome);
    match task.output_style() {
        OutputStyle::Canvas => result_canvas(crop, &caption, renderer),
        OutputStyle::Overlay => {
            let size = (crop.height() as f32 / 6.0).clamp(12.0, 32.0);
            renderer.render(crop, &caption, (4, 4), size, TEXT_COLOR)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Owns the router thread.
pub struct RouterHandle {
    running: Arc<AtomicBool>,
    counters: Arc<RouterCounters>,
    join: Option<JoinHandle<()>>,
}

impl RouterHandle {
    pub fn spawn(mut router: FrameRouter) -> Result<Self> {
        let running = router.running_flag();
        let counters = router.counters.clone();
        let join = std::thread::Builder::new()
            .name("frame-router".to_string())
            .spawn(move || router.run())
            .context("spawn router thread")?;
        Ok(Self {
            running,
            counters,
            join: Some(join),
        })
    }

    /// Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        log::debug!("FrameRouter: stop signal received");
    }

    pub fn stats(&self) -> RouterStats {
        self.counters.snapshot()
    }

    pub fn join(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("router thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for RouterHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_ignores_absent_empty_and_unknown() {
        let queue = BoundedLatestQueue::new(1);
        let mut outputs = OutputChannels::new();
        outputs.add("ocr", queue.clone(), 8, 6);

        assert!(!outputs.push_to_channel("ocr", None));
        assert!(!outputs.push_to_channel("ocr", Some(&Frame::solid(0, 0, [0, 0, 0]))));
        assert!(!outputs.push_to_channel("analog", Some(&Frame::solid(4, 4, [0, 0, 0]))));
        assert!(queue.is_empty());
    }

    #[test]
    fn push_resizes_to_channel_resolution() {
        let queue = BoundedLatestQueue::new(1);
        let mut outputs = OutputChannels::new();
        outputs.add("ocr", queue.clone(), 8, 6);
        assert!(outputs.push_to_channel("ocr", Some(&Frame::solid(40, 40, [1, 2, 3]))));
        let pushed = queue.try_pop_nowait().unwrap();
        assert_eq!((pushed.width(), pushed.height()), (8, 6));
    }

    #[test]
    fn panic_messages_are_extracted() {
        let caught = panic::catch_unwind(|| panic!("bad frame")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "bad frame");
    }
}
