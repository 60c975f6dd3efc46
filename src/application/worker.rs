//! Hilos con propietario único: cada hilo se crea junto con su token de parada
//! y su handle de join, y el padre es el único que puede detenerlo.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (lock, cv) = &*self.inner;
        *lock.lock() = true;
        cv.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Duerme hasta `timeout` salvo que llegue la parada. Devuelve `true` si hay que parar.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let (lock, cv) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = lock.lock();
        while !*stopped {
            if cv.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

pub struct WorkerHandle {
    name: String,
    token: StopToken,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let token = StopToken::new();
        // El emisor muere con el hilo (también si hace panic), lo que despierta a `stop`.
        let (done_tx, done) = bounded::<()>(1);
        let thread_token = token.clone();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                body(thread_token);
            })?;

        debug!(worker = name, "hilo iniciado");
        Ok(Self { name: name.to_string(), token, done, thread: Some(thread) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &StopToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Pide la parada y espera como mucho `timeout`. Devuelve `true` si el hilo terminó.
    /// Idempotente.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.token.stop();
        let Some(thread) = self.thread.take() else {
            return true;
        };

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    warn!(worker = %self.name, "el hilo terminó con panic");
                }
                debug!(worker = %self.name, "hilo detenido");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(worker = %self.name, ?timeout, "el hilo no terminó a tiempo; se abandona");
                false
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop(DEFAULT_JOIN_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn wait_for_returns_early_on_stop() {
        let token = StopToken::new();
        let t = token.clone();
        let started = Instant::now();
        let h = std::thread::spawn(move || t.wait_for(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(20));
        token.stop();
        assert!(h.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn wait_for_times_out_without_stop() {
        assert!(!StopToken::new().wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn stop_joins_and_is_idempotent() {
        let loops = Arc::new(AtomicUsize::new(0));
        let l = loops.clone();
        let mut worker = WorkerHandle::spawn("test-worker", move |token| {
            while !token.wait_for(Duration::from_millis(5)) {
                l.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(worker.stop(Duration::from_secs(1)));
        assert!(worker.is_finished());
        let after = loops.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(after, loops.load(Ordering::SeqCst));
        assert!(worker.stop(Duration::from_secs(1)));
    }

    #[test]
    fn stop_gives_up_on_stuck_thread() {
        let mut worker = WorkerHandle::spawn("stuck", |_token| {
            std::thread::sleep(Duration::from_millis(300));
        })
        .unwrap();
        assert!(!worker.stop(Duration::from_millis(20)));
    }
}
