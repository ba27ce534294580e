//! Gauge Relay
//!
//! Real-time relay that ingests one camera or snapshot source, detects
//! gauges and other labelled regions in every frame, runs the matching
//! per-label task (text recognition, few-shot classification) on each crop,
//! and republishes every task's results as its own live video channel.
//!
//! # Architecture
//!
//! ```text
//! FrameSource -> inbound queue -> FrameRouter -> {channel queue} x N -> ChannelMultiplexer -> viewers
//! ```
//!
//! Every queue is a `BoundedLatestQueue`: producers never block and stale
//! frames are dropped in favour of fresh ones. Sources, the router and the
//! media server each run on their own thread and stop cooperatively.
//!
//! # Module Structure
//!
//! - `frame`: frames, boxes and detected regions
//! - `queue`: the latest-wins queue
//! - `ingest`: frame sources (RTSP stream, HTTP snapshots, synthetic)
//! - `detect`: detection capability
//! - `tasks`: per-label task capabilities and the label routing table
//! - `router`: the per-frame dispatch loop
//! - `output`: demand-driven output channels and the media server
//! - `pipeline`: wiring and orderly shutdown

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod render;
pub mod router;
pub mod tasks;

pub use config::{PipelineConfig, DETECTIONS_CHANNEL};
pub use detect::{DetectionResult, Detector};
pub use frame::{BoundingBox, Frame, Region};
pub use ingest::{ConnectionState, FrameSource, InputMode, SourceHandle};
pub use output::{ChannelHandle, ChannelMultiplexer, ChannelSpec, MediaServer};
pub use pipeline::{Pipeline, PipelineStats};
pub use queue::BoundedLatestQueue;
pub use render::TextRenderer;
pub use router::{FrameRouter, OutputChannels, RouterHandle};
pub use tasks::{TaskBackend, TaskOutcome, TaskRegistry};
