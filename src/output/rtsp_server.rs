//! RTSP media server backed by gstreamer-rtsp-server.
//!
//! Each channel gets a shared media factory whose `appsrc` pulls from the
//! channel handle on `need-data`. The GLib main loop that drives every
//! mount runs on one thread owned by the server.

use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_rtsp_server as gst_rtsp;
use gstreamer_rtsp_server::prelude::*;

use super::{ChannelHandle, ChannelSpec, MediaServer};

pub struct RtspMediaServer {
    address: String,
    port: u16,
    server: gst_rtsp::RTSPServer,
    source_id: Option<glib::SourceId>,
    mainloop: Option<glib::MainLoop>,
    thread: Option<JoinHandle<()>>,
}

impl RtspMediaServer {
    pub fn new(address: &str, port: u16) -> Result<Self> {
        gst::init().context("initialize gstreamer")?;

        let server = gst_rtsp::RTSPServer::new();
        server.set_address(address);
        server.set_service(&port.to_string());

        Ok(Self {
            address: address.to_string(),
            port,
            server,
            source_id: None,
            mainloop: None,
            thread: None,
        })
    }
}

/// appsrc -> H.264 -> RTP payloader; the appsrc is named `source`.
fn launch_description(spec: &ChannelSpec) -> String {
    format!(
        "( appsrc name=source is-live=true block=true format=time \
         caps=video/x-raw,format=RGB,width={},height={},framerate={}/1 \
         ! videoconvert ! video/x-raw,format=I420 \
         ! x264enc speed-preset=ultrafast tune=zerolatency \
         ! rtph264pay config-interval=1 name=pay0 pt=96 )",
        spec.width, spec.height, spec.fps
    )
}

fn attach_appsrc(media: &gst_rtsp::RTSPMedia, channel: ChannelHandle) -> Result<()> {
    let element = media.element();
    let bin = element
        .downcast_ref::<gst::Bin>()
        .ok_or_else(|| anyhow!("media element is not a bin"))?;
    let appsrc = bin
        .by_name_recurse_up("source")
        .ok_or_else(|| anyhow!("appsrc 'source' missing from media pipeline"))?
        .downcast::<gst_app::AppSrc>()
        .map_err(|_| anyhow!("'source' element is not an appsrc"))?;

    channel.begin_session();
    appsrc.set_callbacks(
        gst_app::AppSrcCallbacks::builder()
            .need_data(move |appsrc, _length| {
                let pulled = channel.next_frame();
                let mut buffer = gst::Buffer::from_mut_slice(pulled.frame.into_raw());
                if let Some(buffer) = buffer.get_mut() {
                    let pts = gst::ClockTime::from_nseconds(pulled.pts.as_nanos() as u64);
                    buffer.set_pts(pts);
                    buffer.set_dts(pts);
                    buffer.set_duration(gst::ClockTime::from_nseconds(
                        pulled.duration.as_nanos() as u64,
                    ));
                    buffer.set_offset(pulled.index);
                }
                if let Err(e) = appsrc.push_buffer(buffer) {
                    log::debug!("{}: push-buffer refused: {:?}", channel.name(), e);
                }
            })
            .build(),
    );
    Ok(())
}

impl MediaServer for RtspMediaServer {
    fn mount(&mut self, spec: &ChannelSpec, channel: ChannelHandle) -> Result<()> {
        let mounts = self
            .server
            .mount_points()
            .ok_or_else(|| anyhow!("RTSP server has no mount points"))?;
        let factory = gst_rtsp::RTSPMediaFactory::new();
        factory.set_launch(&launch_description(spec));
        factory.set_shared(true);

        let name = spec.name.clone();
        factory.connect_media_configure(move |_factory, media| {
            if let Err(e) = attach_appsrc(media, channel.clone()) {
                log::error!("{}: failed to configure media: {:#}", name, e);
            }
        });

        mounts.add_factory(&spec.mount, factory);
        log::info!(
            "RtspMediaServer: channel '{}' at rtsp://{}:{}{}",
            spec.name,
            self.address,
            self.port,
            spec.mount
        );
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.mainloop.is_some() {
            return Err(anyhow!("RTSP server already started"));
        }
        let source_id = self
            .server
            .attach(None)
            .context("attach RTSP server to main context")?;
        self.source_id = Some(source_id);

        let mainloop = glib::MainLoop::new(None, false);
        let runner = mainloop.clone();
        let thread = std::thread::Builder::new()
            .name("rtsp-server".to_string())
            .spawn(move || runner.run())
            .context("spawn RTSP main loop thread")?;
        self.mainloop = Some(mainloop);
        self.thread = Some(thread);
        log::info!("RtspMediaServer: listening on {}:{}", self.address, self.port);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mainloop) = self.mainloop.take() {
            mainloop.quit();
        }
        if let Some(source_id) = self.source_id.take() {
            source_id.remove();
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("RTSP main loop thread panicked"))?;
            log::info!("RtspMediaServer: stopped");
        }
        Ok(())
    }
}

impl Drop for RtspMediaServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("RtspMediaServer: {:#}", e);
        }
    }
}
