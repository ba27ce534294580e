//! Frame ingestion sources.
//!
//! Two acquisition strategies feed the router's input queue:
//! - continuous RTSP reads (`--mode video`)
//! - HTTP snapshot polling (`--mode image`)
//!
//! `stub://` addresses select a synthetic generator for either mode, so the
//! default build runs without any network or media stack.

pub mod http;
pub mod rtsp;
pub mod source;
pub mod synthetic;

pub use http::HttpSnapshotSource;
pub use rtsp::RtspReader;
pub use source::{
    ConnectionState, FrameSource, PollSource, SnapshotFetcher, SourceCounters, SourceHandle,
    SourceStats, StreamReader, StreamSource,
};
pub use synthetic::SyntheticReader;

use anyhow::Result;

use crate::config::ReceiveSettings;
use crate::frame::Frame;
use crate::queue::BoundedLatestQueue;

/// Input mode selected on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum InputMode {
    /// Continuous RTSP stream.
    Video,
    /// HTTP snapshot polling.
    Image,
}

/// Build the source for `mode`, publishing into `queue`.
pub fn create_source(
    mode: InputMode,
    settings: &ReceiveSettings,
    queue: BoundedLatestQueue<Frame>,
) -> Result<Box<dyn FrameSource>> {
    match mode {
        InputMode::Video => {
            let reader = RtspReader::new(&settings.rtsp_url)?;
            log::info!("ingest: video mode, reading {}", settings.rtsp_url);
            Ok(Box::new(StreamSource::from_settings(reader, queue, settings)))
        }
        InputMode::Image => {
            let fetcher = HttpSnapshotSource::new(&settings.http_url, settings.read_timeout)?;
            log::info!("ingest: image mode, polling {}", settings.http_url);
            Ok(Box::new(PollSource::from_settings(fetcher, queue, settings)))
        }
    }
}
