//! Pipeline wiring and shutdown order.

use anyhow::Result;

use crate::ingest::{FrameSource, SourceHandle, SourceStats};
use crate::output::ChannelMultiplexer;
use crate::queue::QueueStats;
use crate::router::{FrameRouter, RouterHandle, RouterStats};

/// Combined statistics for periodic logging.
#[derive(Clone, Debug, Default)]
pub struct PipelineStats {
    pub source: SourceStats,
    pub router: RouterStats,
    /// `(channel, queue stats)` sorted by channel name.
    pub channels: Vec<(String, QueueStats)>,
}

impl PipelineStats {
    pub fn log(&self) {
        let dropped: u64 = self.channels.iter().map(|(_, s)| s.dropped).sum();
        log::info!(
            "stats: captured={} losses={} routed={} skipped={} dispatched={} region_failures={} output_dropped={}",
            self.source.frames_captured,
            self.source.losses,
            self.router.frames_routed,
            self.router.frames_skipped,
            self.router.regions_dispatched,
            self.router.region_failures,
            dropped
        );
    }
}

/// Running source, router and multiplexer.
pub struct Pipeline {
    source: SourceHandle,
    router: RouterHandle,
    multiplexer: ChannelMultiplexer,
}

impl Pipeline {
    /// Start the router, then the source. The multiplexer should already be
    /// serving so early frames have somewhere to go.
    pub fn start(
        source: Box<dyn FrameSource>,
        router: FrameRouter,
        multiplexer: ChannelMultiplexer,
    ) -> Result<Self> {
        let router = RouterHandle::spawn(router)?;
        let source = SourceHandle::spawn(source)?;
        Ok(Self {
            source,
            router,
            multiplexer,
        })
    }

    pub fn stats(&self) -> PipelineStats {
        let mut channels: Vec<(String, QueueStats)> =
            self.multiplexer.stats().into_iter().collect();
        channels.sort_by(|a, b| a.0.cmp(&b.0));
        PipelineStats {
            source: self.source.stats(),
            router: self.router.stats(),
            channels,
        }
    }

    /// Signal source and router, join both, then stop the multiplexer last
    /// so in-flight viewer sessions are served until the end.
    pub fn shutdown(mut self) -> Result<()> {
        log::info!("pipeline: shutting down");
        self.source.stop();
        self.router.stop();

        let source_result = self.source.join();
        let router_result = self.router.join();
        let server_result = self.multiplexer.stop();

        source_result?;
        router_result?;
        server_result?;
        log::info!("pipeline: shutdown complete");
        Ok(())
    }
}
