//! Captura de cámaras IP (RTSP / HTTP) mediante un pipeline GStreamer que termina en `appsink`.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::{VideoFrameRef, VideoInfo};
use image::RgbImage;
use std::time::Duration;

use crate::application::ports::VideoStream;
use crate::domain::errors::{DomainResult, PipelineError};

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Lo más que bloquea una apertura (espera del primer frame) o una lectura.
pub const MAX_BLOCK: Duration = FIRST_FRAME_TIMEOUT;

pub struct GstNetworkStream {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    first: Option<RgbImage>,
}

impl GstNetworkStream {
    /// Lanza el pipeline y espera al primer frame: si no llega, la conexión se da por fallida.
    pub fn open(url: &str, fps: u32) -> DomainResult<Self> {
        let fail = |reason: String| PipelineError::connect(url, reason);
        gst::init().map_err(|e| fail(e.to_string()))?;

        let description = pipeline_description(url, fps);
        tracing::debug!(%description, "Pipeline GStreamer");

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| fail(e.to_string()))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| fail("el elemento raíz no es un pipeline".into()))?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.dynamic_cast::<AppSink>().ok())
            .ok_or_else(|| fail("falta el appsink 'sink'".into()))?;

        let mut stream = Self { pipeline, appsink, first: None };
        stream
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| fail(e.to_string()))?;

        let first = stream.pull(FIRST_FRAME_TIMEOUT).map_err(|e| fail(e.to_string()))?;
        stream.first = Some(first);
        Ok(stream)
    }

    fn pull(&self, timeout: Duration) -> DomainResult<RgbImage> {
        let timeout = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        let sample = self.appsink.try_pull_sample(timeout).ok_or_else(|| {
            if self.appsink.is_eos() {
                PipelineError::ReadFailure("fin del stream".into())
            } else {
                PipelineError::ReadFailure(self.bus_error().unwrap_or_else(|| "sin frames del stream".into()))
            }
        })?;

        let read = |reason: &str| PipelineError::ReadFailure(reason.to_string());
        let buffer = sample.buffer().ok_or_else(|| read("muestra sin buffer"))?;
        let caps = sample.caps().ok_or_else(|| read("muestra sin caps"))?;
        let info = VideoInfo::from_caps(caps).map_err(|e| read(&e.to_string()))?;
        let frame = VideoFrameRef::from_buffer_ref_readable(buffer, &info).map_err(|e| read(&e.to_string()))?;

        let (w, h) = (frame.width(), frame.height());
        let stride = frame.plane_stride()[0] as usize;
        let data = frame.plane_data(0).map_err(|e| read(&e.to_string()))?;
        let row = w as usize * 3;

        // Las filas pueden venir con relleno: se copian una a una.
        let mut pixels = Vec::with_capacity(row * h as usize);
        for y in 0..h as usize {
            let start = y * stride;
            let line = data.get(start..start + row).ok_or_else(|| read("buffer más corto que el frame"))?;
            pixels.extend_from_slice(line);
        }
        RgbImage::from_raw(w, h, pixels).ok_or_else(|| read("dimensiones inválidas"))
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(e) => Some(e.error().to_string()),
            _ => None,
        }
    }
}

impl VideoStream for GstNetworkStream {
    fn read_frame(&mut self) -> DomainResult<RgbImage> {
        match self.first.take() {
            Some(img) => Ok(img),
            None => self.pull(READ_TIMEOUT),
        }
    }
}

impl Drop for GstNetworkStream {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// `appsink` con un único buffer y descarte: siempre se entrega el frame más reciente.
pub fn pipeline_description(url: &str, fps: u32) -> String {
    let location = url.replace('"', "%22");
    let source = if location.to_ascii_lowercase().starts_with("rtsp") {
        format!("rtspsrc location=\"{location}\" latency=200 protocols=tcp")
    } else {
        format!("souphttpsrc location=\"{location}\" is-live=true")
    };
    format!(
        "{source} ! decodebin ! videoconvert ! videorate ! video/x-raw,format=RGB,framerate={}/1 ! \
         appsink name=sink max-buffers=1 drop=true sync=false",
        fps.max(1)
    )
}
