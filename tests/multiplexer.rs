use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use gauge_relay::detect::StubDetector;
use gauge_relay::ingest::{StreamSource, SyntheticReader};
use gauge_relay::output::{ChannelHandle, ChannelSpec, FrameOrigin, MediaServer};
use gauge_relay::tasks::{TaskBackend, TaskOutcome, TaskRegistry};
use gauge_relay::{BoundedLatestQueue, ChannelMultiplexer, Frame, FrameRouter, Pipeline, TextRenderer};

fn spec(name: &str, width: u32, height: u32) -> ChannelSpec {
    ChannelSpec {
        name: name.to_string(),
        mount: format!("/{}", name),
        width,
        height,
        fps: 10,
    }
}

fn multiplexer() -> ChannelMultiplexer {
    ChannelMultiplexer::new(
        &[
            spec("detections", 64, 48),
            spec("ocr", 40, 30),
            spec("classification", 20, 20),
        ],
        2,
        Arc::new(TextRenderer::disabled()),
    )
}

/// Records what the multiplexer asks of it.
#[derive(Default)]
struct RecordingServer {
    events: Arc<Mutex<Vec<String>>>,
    handles: Arc<Mutex<Vec<ChannelHandle>>>,
    fail_start: bool,
}

impl MediaServer for RecordingServer {
    fn mount(&mut self, spec: &ChannelSpec, channel: ChannelHandle) -> Result<()> {
        self.events.lock().unwrap().push(format!("mount {}", spec.mount));
        self.handles.lock().unwrap().push(channel);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(anyhow!("address in use"));
        }
        self.events.lock().unwrap().push("start".to_string());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.events.lock().unwrap().push("stop".to_string());
        Ok(())
    }
}

#[test]
fn placeholder_matches_channel_geometry_before_any_output() {
    let mux = multiplexer();
    for (name, w, h) in [("detections", 64, 48), ("ocr", 40, 30), ("classification", 20, 20)] {
        let pulled = mux.handle(name).unwrap().next_frame();
        assert_eq!(pulled.origin, FrameOrigin::Placeholder);
        assert_eq!((pulled.frame.width(), pulled.frame.height()), (w, h));
    }
}

#[test]
fn last_known_good_is_repeated_unchanged() {
    let mux = multiplexer();
    let outputs = mux.outputs();
    let channel = mux.handle("ocr").unwrap();

    outputs.push_to_channel("ocr", Some(&Frame::solid(10, 10, [7, 8, 9])));
    let fresh = channel.next_frame();
    assert_eq!(fresh.origin, FrameOrigin::Fresh);
    assert_eq!((fresh.frame.width(), fresh.frame.height()), (40, 30));

    for _ in 0..3 {
        let repeat = channel.next_frame();
        assert_eq!(repeat.origin, FrameOrigin::Repeat);
        assert_eq!(repeat.frame, fresh.frame);
    }
}

#[test]
fn channels_do_not_share_frames() {
    let mux = multiplexer();
    let outputs = mux.outputs();
    outputs.push_to_channel("ocr", Some(&Frame::solid(5, 5, [1, 2, 3])));

    assert_eq!(mux.handle("ocr").unwrap().next_frame().origin, FrameOrigin::Fresh);
    assert_eq!(
        mux.handle("classification").unwrap().next_frame().origin,
        FrameOrigin::Placeholder
    );
    assert_eq!(
        mux.handle("detections").unwrap().next_frame().origin,
        FrameOrigin::Placeholder
    );
}

#[test]
fn serve_mounts_every_channel_then_starts() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let handles = Arc::new(Mutex::new(Vec::new()));
    let server = RecordingServer {
        events: events.clone(),
        handles: handles.clone(),
        fail_start: false,
    };

    let mut mux = multiplexer();
    mux.serve(Box::new(server)).unwrap();
    assert!(mux.serve(Box::new(RecordingServer::default())).is_err());
    mux.stop().unwrap();
    mux.stop().unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "mount /detections",
            "mount /ocr",
            "mount /classification",
            "start",
            "stop"
        ]
    );

    let handles = handles.lock().unwrap();
    assert_eq!(handles.len(), 3);
    assert_eq!(handles[1].name(), "ocr");
}

#[test]
fn failed_start_is_reported() {
    let mut mux = multiplexer();
    let server = RecordingServer {
        fail_start: true,
        ..Default::default()
    };
    assert!(mux.serve(Box::new(server)).is_err());
}

/// Echoes the crop width as its reading.
struct WidthReader(&'static str);

impl TaskBackend for WidthReader {
    fn name(&self) -> &str {
        self.0
    }

    fn execute(&mut self, crop: &Frame) -> Result<TaskOutcome> {
        Ok(TaskOutcome::new(crop.width().to_string(), 0.9))
    }
}

#[test]
fn pipeline_runs_end_to_end_and_shuts_down() {
    let renderer = Arc::new(TextRenderer::disabled());
    let mut mux = multiplexer();
    let events = Arc::new(Mutex::new(Vec::new()));
    mux.serve(Box::new(RecordingServer {
        events: events.clone(),
        ..Default::default()
    }))
    .unwrap();
    let ocr = mux.handle("ocr").unwrap();
    let classification = mux.handle("classification").unwrap();

    let mut tasks = TaskRegistry::new();
    tasks.register(Box::new(WidthReader("classification")));
    tasks.register(Box::new(WidthReader("ocr")));
    tasks.route("digital-gauge", "ocr").unwrap();

    let inbound = BoundedLatestQueue::new(1);
    let source = StreamSource::new(
        SyntheticReader::new("stub://camera").with_size(80, 60),
        inbound.clone(),
    );
    let router = FrameRouter::new(
        inbound,
        Box::new(StubDetector::new("digital-gauge", renderer.clone())),
        tasks,
        mux.outputs(),
        renderer,
    )
    .with_pop_timeout(Duration::from_millis(20));

    let pipeline = Pipeline::start(Box::new(source), router, mux).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while pipeline.stats().router.regions_dispatched < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let stats = pipeline.stats();
    assert!(stats.source.frames_captured >= 2);
    assert!(stats.router.regions_dispatched >= 2);
    assert!(stats.router.frames_routed >= 2);
    assert_eq!(stats.channels.len(), 3);

    let pulled = ocr.next_frame();
    assert_ne!(pulled.origin, FrameOrigin::Placeholder);
    assert_eq!((pulled.frame.width(), pulled.frame.height()), (40, 30));
    assert_eq!(classification.next_frame().origin, FrameOrigin::Placeholder);

    pipeline.shutdown().unwrap();
    assert_eq!(events.lock().unwrap().last().map(String::as_str), Some("stop"));
}
