use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::error;

use crate::application::worker::WorkerHandle;

/// Marca el ritmo de una tarea periódica: ejecuta, mide y duerme el resto del periodo.
#[derive(Debug, Clone, Copy)]
pub struct FixedRateDriver {
    period: Duration,
}

impl FixedRateDriver {
    pub fn new(period: Duration) -> Self {
        Self { period: period.max(Duration::from_millis(1)) }
    }

    pub fn from_fps(fps: u32) -> Self {
        Self::new(Duration::from_secs(1) / fps.max(1))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Lo que queda del periodo tras un tick de duración `elapsed`; cero si se pasó.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.period.saturating_sub(elapsed)
    }

    /// Lanza la tarea en su propio hilo. Un panic dentro de un tick se registra y el bucle sigue.
    pub fn spawn<F>(self, name: &str, mut tick: F) -> std::io::Result<WorkerHandle>
    where
        F: FnMut() + Send + 'static,
    {
        let worker_name = name.to_string();
        WorkerHandle::spawn(name, move |token| {
            while !token.is_stopped() {
                let started = Instant::now();
                if catch_unwind(AssertUnwindSafe(&mut tick)).is_err() {
                    error!(worker = %worker_name, "panic dentro del ciclo; se continúa");
                }
                if token.wait_for(self.remaining(started.elapsed())) {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn remaining_is_period_minus_elapsed() {
        let d = FixedRateDriver::new(Duration::from_millis(100));
        assert_eq!(d.remaining(Duration::from_millis(30)), Duration::from_millis(70));
        assert_eq!(d.remaining(Duration::from_millis(150)), Duration::ZERO);
    }

    #[test]
    fn from_fps_computes_period() {
        assert_eq!(FixedRateDriver::from_fps(20).period(), Duration::from_millis(50));
        assert_eq!(FixedRateDriver::from_fps(0).period(), Duration::from_secs(1));
    }

    #[test]
    fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();
        let mut worker = FixedRateDriver::new(Duration::from_millis(5))
            .spawn("ticker", move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(80));
        assert!(worker.stop(Duration::from_secs(1)));
        let n = ticks.load(Ordering::SeqCst);
        assert!(n >= 3, "solo {n} ticks");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(n, ticks.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_tick_does_not_kill_the_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();
        let mut worker = FixedRateDriver::new(Duration::from_millis(2))
            .spawn("panicky", move || {
                if t.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("primer ciclo");
                }
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        worker.stop(Duration::from_secs(1));
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
