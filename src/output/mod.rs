//! Output channels.
//!
//! Every task result stream is exposed as an independent, demand-driven
//! channel. The media-serving backend only sees the pull contract
//! (`ChannelHandle::next_frame`) plus the channel's fixed geometry.

mod multiplexer;
#[cfg(feature = "rtsp-server")]
pub mod rtsp_server;

pub use multiplexer::{ChannelHandle, ChannelMultiplexer, FrameOrigin, PulledFrame};
#[cfg(feature = "rtsp-server")]
pub use rtsp_server::RtspMediaServer;

use anyhow::Result;

/// Static description of one output channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    /// Mount identifier, e.g. `/ocr`.
    pub mount: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Media-serving subsystem.
///
/// Mounts are created before `start`; the server invokes each channel's
/// pull callback on its own schedule.
pub trait MediaServer: Send {
    fn mount(&mut self, spec: &ChannelSpec, channel: ChannelHandle) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Stop serving and join any thread the server owns. Idempotent.
    fn stop(&mut self) -> Result<()>;
}
