use image::{ImageFormat, RgbImage};
use std::time::Duration;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::application::ports::VideoStream;
use crate::domain::errors::{DomainResult, PipelineError};

const BUFFER_COUNT: u32 = 4;
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Captura de un dispositivo V4L2 local (MJPG o YUYV) en modo MMAP.
pub struct V4l2Capture {
    // El stream se suelta antes que el dispositivo.
    stream: Stream<'static>,
    _device: Device,
    fourcc: FourCC,
    width: u32,
    height: u32,
}

impl V4l2Capture {
    /// Abre el dispositivo, pide MJPG (si el driver no lo acepta se queda con YUYV) y arranca el stream.
    pub fn open(path: &str, fps: u32) -> DomainResult<Self> {
        let fail = |reason: String| PipelineError::connect(path, reason);
        let dev = Device::with_path(path).map_err(|e| fail(e.to_string()))?;

        // 1. Formato
        let mut fmt = dev.format().map_err(|e| fail(e.to_string()))?;
        fmt.fourcc = FourCC::new(b"MJPG");
        let actual = dev.set_format(&fmt).map_err(|e| fail(e.to_string()))?;
        match actual.fourcc.str() {
            Ok("MJPG") | Ok("YUYV") => {}
            _ => return Err(fail(format!("formato {} no soportado", actual.fourcc))),
        }

        // 2. FPS (el driver puede ignorarlo)
        if let Ok(mut params) = dev.params() {
            params.interval.numerator = 1;
            params.interval.denominator = fps.max(1);
            let _ = dev.set_params(&params);
        }

        // 3. Stream MMAP con lectura acotada
        let mut stream = Stream::with_buffers(&dev, v4l::buffer::Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| fail(e.to_string()))?;
        stream.set_timeout(READ_TIMEOUT);

        tracing::info!(
            "Cámara abierta: {}x{} [{}] a {} FPS",
            actual.width, actual.height, actual.fourcc, fps
        );

        Ok(Self {
            stream,
            _device: dev,
            fourcc: actual.fourcc,
            width: actual.width,
            height: actual.height,
        })
    }
}

impl VideoStream for V4l2Capture {
    fn read_frame(&mut self) -> DomainResult<RgbImage> {
        let (data, _) = self
            .stream
            .next()
            .map_err(|e| PipelineError::ReadFailure(e.to_string()))?;

        match self.fourcc.str() {
            Ok("MJPG") => image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map(|img| img.to_rgb8())
                .map_err(|e| PipelineError::ReadFailure(format!("MJPG corrupto: {e}"))),
            Ok("YUYV") => Ok(yuyv_to_rgb(data, self.width, self.height)),
            _ => Err(PipelineError::ReadFailure(format!("formato {} no soportado", self.fourcc))),
        }
    }
}

/// YUYV (YUV 4:2:2) a RGB, BT.601. Cada bloque `[Y0, U, Y1, V]` son dos píxeles.
pub fn yuyv_to_rgb(yuyv: &[u8], w: u32, h: u32) -> RgbImage {
    let mut out = RgbImage::new(w, h);
    if w == 0 {
        return out;
    }
    let convert = |y: f32, u: f32, v: f32| {
        image::Rgb([
            (y + 1.402 * v).clamp(0.0, 255.0) as u8,
            (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8,
            (y + 1.772 * u).clamp(0.0, 255.0) as u8,
        ])
    };

    for (i, chunk) in yuyv.chunks_exact(4).enumerate() {
        let (y0, y1) = (chunk[0] as f32, chunk[2] as f32);
        let (u, v) = (chunk[1] as f32 - 128.0, chunk[3] as f32 - 128.0);

        let idx = i as u32 * 2;
        let (x, y) = (idx % w, idx / w);
        if y >= h {
            break;
        }
        out.put_pixel(x, y, convert(y0, u, v));
        if x + 1 < w {
            out.put_pixel(x + 1, y, convert(y1, u, v));
        }
    }
    out
}
