use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::{ChannelSpec, MediaServer};
use crate::frame::Frame;
use crate::queue::{BoundedLatestQueue, QueueStats};
use crate::render::{placeholder, TextRenderer};
use crate::router::OutputChannels;

/// Where a pulled frame came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Newly popped from the channel queue.
    Fresh,
    /// Re-emitted last-known-good frame.
    Repeat,
    /// Synthesized; the channel has never produced output.
    Placeholder,
}

/// One frame handed to the media server, with its timing.
#[derive(Clone, Debug)]
pub struct PulledFrame {
    pub frame: Frame,
    pub origin: FrameOrigin,
    /// Per-session frame counter.
    pub index: u64,
    pub pts: Duration,
    pub duration: Duration,
}

struct ChannelState {
    last_good: Option<Frame>,
    placeholder: Option<Frame>,
    counter: u64,
}

/// Pull side of one channel.
///
/// Clones share state. Only the media server's demand callback should pull.
#[derive(Clone)]
pub struct ChannelHandle {
    spec: Arc<ChannelSpec>,
    queue: BoundedLatestQueue<Frame>,
    state: Arc<Mutex<ChannelState>>,
    renderer: Arc<TextRenderer>,
}

impl ChannelHandle {
    fn new(spec: ChannelSpec, buffer_size: usize, renderer: Arc<TextRenderer>) -> Self {
        Self {
            spec: Arc::new(spec),
            queue: BoundedLatestQueue::new(buffer_size),
            state: Arc::new(Mutex::new(ChannelState {
                last_good: None,
                placeholder: None,
                counter: 0,
            })),
            renderer,
        }
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A new viewer session starts: restart frame timing from zero.
    pub fn begin_session(&self) {
        self.state().counter = 0;
        log::debug!("{}: new viewer session", self.spec.name);
    }

    /// Frame duration at the channel's configured rate.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.spec.fps.max(1)
    }

    /// Produce the next frame for this channel. Never blocks.
    ///
    /// Serves the newest queued frame, else the last-known-good frame, else
    /// a placeholder showing the channel name.
    pub fn next_frame(&self) -> PulledFrame {
        let fresh = self.queue.try_pop_nowait();
        let mut state = self.state();

        let (frame, origin) = if let Some(frame) = fresh {
            state.last_good = Some(frame.clone());
            (frame, FrameOrigin::Fresh)
        } else if let Some(frame) = state.last_good.clone() {
            (frame, FrameOrigin::Repeat)
        } else {
            let spec = &self.spec;
            let frame = state
                .placeholder
                .get_or_insert_with(|| placeholder(&spec.name, spec.width, spec.height, &self.renderer))
                .clone();
            (frame, FrameOrigin::Placeholder)
        };

        let index = state.counter;
        state.counter += 1;
        let duration = self.frame_duration();
        PulledFrame {
            frame,
            origin,
            index,
            pts: Duration::from_nanos((duration.as_nanos() as u64).saturating_mul(index)),
            duration,
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    fn reset(&self) {
        let mut state = self.state();
        state.last_good = None;
        state.counter = 0;
        while self.queue.try_pop_nowait().is_some() {}
    }
}

/// Owns one `ChannelHandle` per configured channel and, once serving, the
/// media server they are mounted on.
pub struct ChannelMultiplexer {
    channels: Vec<ChannelHandle>,
    server: Option<Box<dyn MediaServer>>,
}

impl ChannelMultiplexer {
    pub fn new(specs: &[ChannelSpec], buffer_size: usize, renderer: Arc<TextRenderer>) -> Self {
        let channels = specs
            .iter()
            .cloned()
            .map(|spec| ChannelHandle::new(spec, buffer_size, renderer.clone()))
            .collect();
        Self {
            channels,
            server: None,
        }
    }

    /// Write side for the router.
    pub fn outputs(&self) -> OutputChannels {
        let mut outputs = OutputChannels::new();
        for channel in &self.channels {
            outputs.add(
                channel.name(),
                channel.queue.clone(),
                channel.spec.width,
                channel.spec.height,
            );
        }
        outputs
    }

    pub fn handle(&self, name: &str) -> Option<ChannelHandle> {
        self.channels.iter().find(|ch| ch.name() == name).cloned()
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|ch| ch.name()).collect()
    }

    /// Mount every channel on `server` and start it.
    pub fn serve(&mut self, mut server: Box<dyn MediaServer>) -> Result<()> {
        if self.server.is_some() {
            return Err(anyhow!("multiplexer is already serving"));
        }
        for channel in &self.channels {
            server
                .mount(&channel.spec, channel.clone())
                .with_context(|| format!("mount channel '{}'", channel.name()))?;
        }
        server.start().context("start media server")?;
        self.server = Some(server);
        Ok(())
    }

    /// Per-channel drop counts, for periodic stats.
    pub fn stats(&self) -> HashMap<String, QueueStats> {
        self.channels
            .iter()
            .map(|ch| (ch.name().to_string(), ch.queue_stats()))
            .collect()
    }

    /// Tear down the server and per-channel state. Safe to call repeatedly,
    /// and when nothing was ever served.
    pub fn stop(&mut self) -> Result<()> {
        let result = match self.server.take() {
            Some(mut server) => server.stop(),
            None => Ok(()),
        };
        for channel in &self.channels {
            channel.reset();
        }
        log::info!("ChannelMultiplexer: stopped");
        result
    }
}

impl Drop for ChannelMultiplexer {
    fn drop(&mut self) {
        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.stop() {
                log::warn!("ChannelMultiplexer: server stop failed: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ChannelSpec {
        ChannelSpec {
            name: name.to_string(),
            mount: format!("/{}", name),
            width: 32,
            height: 24,
            fps: 25,
        }
    }

    fn mux() -> ChannelMultiplexer {
        ChannelMultiplexer::new(
            &[spec("detections"), spec("ocr")],
            1,
            Arc::new(TextRenderer::disabled()),
        )
    }

    #[test]
    fn timing_follows_counter_and_resets_per_session() {
        let mux = mux();
        let channel = mux.handle("ocr").unwrap();
        let first = channel.next_frame();
        let second = channel.next_frame();
        assert_eq!((first.index, second.index), (0, 1));
        assert_eq!(second.pts, Duration::from_millis(40));
        assert_eq!(second.duration, Duration::from_millis(40));

        channel.begin_session();
        assert_eq!(channel.next_frame().index, 0);
    }

    #[test]
    fn outputs_cover_every_channel() {
        let mux = mux();
        let outputs = mux.outputs();
        assert!(outputs.contains("detections"));
        assert!(outputs.contains("ocr"));
        assert_eq!(mux.channel_names(), vec!["detections", "ocr"]);
    }

    #[test]
    fn stop_without_server_is_safe() {
        let mut mux = mux();
        mux.stop().unwrap();
        mux.stop().unwrap();
    }

    #[test]
    fn stop_clears_last_known_good() {
        let mut mux = mux();
        let channel = mux.handle("ocr").unwrap();
        mux.outputs()
            .push_to_channel("ocr", Some(&Frame::solid(32, 24, [9, 9, 9])));
        assert_eq!(channel.next_frame().origin, FrameOrigin::Fresh);
        mux.stop().unwrap();
        assert_eq!(channel.next_frame().origin, FrameOrigin::Placeholder);
    }
}
