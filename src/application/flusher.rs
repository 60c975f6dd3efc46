use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::application::ports::DetectionStore;
use crate::application::scheduler::FixedRateDriver;
use crate::application::worker::WorkerHandle;

/// Vuelca periódicamente al almacén los registros encolados, independiente del ciclo de detección.
pub struct PersistenceFlusher {
    store: Arc<dyn DetectionStore>,
    worker: Option<WorkerHandle>,
}

impl PersistenceFlusher {
    pub fn spawn(store: Arc<dyn DetectionStore>, interval: Duration) -> std::io::Result<Self> {
        let tick_store = store.clone();
        let worker = FixedRateDriver::new(interval).spawn("persistence-flush", move || {
            flush_once(tick_store.as_ref());
        })?;
        info!(?interval, "Volcado periódico de detecciones iniciado");
        Ok(Self { store, worker: Some(worker) })
    }

    /// Para el hilo y hace un último volcado.
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop(Duration::from_secs(5));
            flush_once(self.store.as_ref());
        }
    }
}

impl Drop for PersistenceFlusher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn flush_once(store: &dyn DetectionStore) {
    match store.flush() {
        Ok(0) => {}
        Ok(n) => debug!(written = n, "registros volcados"),
        Err(e) => error!(error = %e, "fallo volcando registros"),
    }
}
