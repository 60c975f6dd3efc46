use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};

use crate::application::ports::VideoStream;
use crate::domain::errors::DomainResult;

/// Fuente sintética: degradado que se desplaza y un cuadrado que rebota. Respeta los FPS pedidos.
pub struct TestPatternStream {
    width: u32,
    height: u32,
    period: Duration,
    tick: u32,
    next_due: Option<Instant>,
}

impl TestPatternStream {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width: width.max(16),
            height: height.max(16),
            period: Duration::from_secs(1) / fps.max(1),
            tick: 0,
            next_due: None,
        }
    }

    fn render(&self) -> RgbImage {
        let t = self.tick;
        let side = (self.height / 4).max(4);
        let span_x = self.width - side;
        let span_y = self.height - side;
        let bounce = |pos: u32, span: u32| {
            let p = pos % (2 * span);
            if p < span { p } else { 2 * span - p }
        };
        let (bx, by) = (bounce(t * 7, span_x), bounce(t * 5, span_y));

        RgbImage::from_fn(self.width, self.height, |x, y| {
            if (bx..bx + side).contains(&x) && (by..by + side).contains(&y) {
                Rgb([240, 240, 240])
            } else {
                Rgb([((x + t * 3) % 256) as u8, ((y + t) % 256) as u8, 96])
            }
        })
    }
}

impl VideoStream for TestPatternStream {
    fn read_frame(&mut self) -> DomainResult<RgbImage> {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.period);
        self.tick = self.tick.wrapping_add(1);
        Ok(self.render())
    }
}
