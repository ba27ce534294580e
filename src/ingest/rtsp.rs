//! RTSP stream reader.
//!
//! Uses GStreamer for real RTSP decode, with a synthetic fallback for
//! `stub://` URLs. The reader only owns the decode handle; reconnection and
//! outage bookkeeping live in `StreamSource`.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::Result;
use std::time::Duration;

use super::source::StreamReader;
use super::synthetic::{is_stub_url, SyntheticReader};
use crate::frame::Frame;

pub struct RtspReader {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticReader),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspReader),
}

impl RtspReader {
    pub fn new(url: &str) -> Result<Self> {
        if is_stub_url(url) {
            Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticReader::new(url)),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerRtspReader::new(url)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!("RTSP url '{}' requires the rtsp-gstreamer feature", url)
            }
        }
    }
}

impl StreamReader for RtspReader {
    fn describe(&self) -> String {
        match &self.backend {
            RtspBackend::Synthetic(reader) => StreamReader::describe(reader),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(reader) => reader.url.clone(),
        }
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(reader) => reader.open(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(reader) => reader.open(),
        }
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        match &mut self.backend {
            RtspBackend::Synthetic(reader) => reader.read_frame(timeout),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(reader) => reader.read_frame(timeout),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            RtspBackend::Synthetic(reader) => reader.release(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(reader) => reader.release(),
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer decode pipeline
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspReader {
    url: String,
    pipeline: Option<(gstreamer::Pipeline, gstreamer_app::AppSink)>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspReader {
    fn new(url: &str) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self {
            url: url.to_string(),
            pipeline: None,
        })
    }

    /// rtspsrc ! decodebin ! videoconvert ! appsink, keeping only the newest
    /// decoded buffer.
    fn build_pipeline(&self) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink)> {
        use gstreamer::prelude::*;

        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);
        Ok((pipeline, appsink))
    }

    fn open(&mut self) -> Result<()> {
        use gstreamer::prelude::*;

        let (pipeline, appsink) = self.build_pipeline()?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.pipeline = Some((pipeline, appsink));
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        use gstreamer::prelude::*;

        let (pipeline, appsink) = self
            .pipeline
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("RTSP pipeline not open"))?;

        if let Some(bus) = pipeline.bus() {
            while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
                use gstreamer::MessageView;
                match message.view() {
                    MessageView::Error(err) => {
                        anyhow::bail!(
                            "gstreamer error from {:?}: {}",
                            err.src().map(|s| s.path_string()),
                            err.error()
                        );
                    }
                    MessageView::Eos(..) => anyhow::bail!("RTSP stream reached EOS"),
                    _ => {}
                }
            }
        }

        let timeout = gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64);
        let Some(sample) = appsink.try_pull_sample(timeout) else {
            return Ok(None);
        };
        sample_to_frame(&sample).map(Some)
    }

    fn release(&mut self) {
        use gstreamer::prelude::*;

        if let Some((pipeline, _)) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                log::debug!("RtspReader: failed to stop pipeline: {}", e);
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Frame::from_raw(width, height, data.to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("RTSP buffer row is out of bounds")?,
        );
    }
    Frame::from_raw(width, height, pixels)
}
