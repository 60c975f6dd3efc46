use crossbeam_channel::{bounded, RecvTimeoutError};
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::application::frame_source::{FrameSource, FrameSourceOptions};
use crate::application::ports::{Detector, DetectorFactory, StreamOpener};
use crate::domain::{
    detection::Detection,
    errors::{DomainResult, PipelineError},
    settings::ConfigurationSnapshot,
    stream::Frame,
};

/// Pareja (Detector, Frame Source) ligada a un único snapshot.
pub struct Runner {
    snapshot: Arc<ConfigurationSnapshot>,
    // Orden de campos = orden de drop: primero la fuente, después el modelo.
    source: FrameSource,
    detector: Box<dyn Detector>,
}

impl Runner {
    /// Construcción síncrona: carga el modelo y abre la cámara.
    pub fn build(
        snapshot: Arc<ConfigurationSnapshot>,
        opener: Arc<dyn StreamOpener>,
        detectors: &dyn DetectorFactory,
        options: FrameSourceOptions,
    ) -> DomainResult<Self> {
        let detector = detectors.load(&snapshot)?;
        let source = FrameSource::start(opener, snapshot.stream_address(), snapshot.target_fps(), options)?;
        Ok(Self { snapshot, source, detector })
    }

    /// Construye en un hilo auxiliar y espera como mucho `timeout`.
    ///
    /// Si vence el plazo se devuelve `ConnectTimeout`; el hilo auxiliar sigue hasta terminar
    /// y el Runner que llegue tarde se destruye (cerrando su stream) sin llegar a usarse.
    pub fn build_with_timeout(
        snapshot: Arc<ConfigurationSnapshot>,
        opener: Arc<dyn StreamOpener>,
        detectors: Arc<dyn DetectorFactory>,
        options: FrameSourceOptions,
        timeout: Duration,
    ) -> DomainResult<Self> {
        let address = snapshot.stream_address().to_string();
        let (tx, rx) = bounded::<DomainResult<Runner>>(1);
        let started = Instant::now();

        let helper = std::thread::Builder::new()
            .name("runner-build".into())
            .spawn(move || {
                let result = Runner::build(snapshot, opener, detectors.as_ref(), options);
                if let Err(unsent) = tx.send(result) {
                    if let Ok(late) = unsent.into_inner() {
                        warn!(address = %late.address(), "Runner terminado fuera de plazo; liberando");
                        late.shutdown();
                    }
                }
            })
            .map_err(|e| PipelineError::connect(&address, format!("no se pudo lanzar el hilo de construcción: {e}")))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => {
                let _ = helper.join();
                if result.is_ok() {
                    info!(%address, elapsed_ms = started.elapsed().as_millis() as u64, "Runner construido");
                }
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                // Al soltar `rx` el envío tardío falla y el hilo auxiliar libera lo que haya abierto.
                drop(rx);
                Err(PipelineError::ConnectTimeout { address, timeout_ms: timeout.as_millis() as u64 })
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = helper.join();
                Err(PipelineError::connect(address, "la construcción del Runner terminó con panic"))
            }
        }
    }

    pub fn snapshot(&self) -> &ConfigurationSnapshot {
        &self.snapshot
    }

    pub fn hash(&self) -> &str {
        self.snapshot.hash()
    }

    pub fn address(&self) -> &str {
        self.source.address()
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Un hilo de captura muerto sin parada explícita es un fallo de conexión (fatal).
    pub fn next_frame(&self, timeout: Duration) -> DomainResult<Frame> {
        match self.source.get_latest_frame(timeout) {
            Err(PipelineError::FrameTimeout) if !self.source.is_alive() => Err(PipelineError::connect(
                self.address(),
                "el hilo de captura terminó inesperadamente",
            )),
            other => other,
        }
    }

    pub fn predict(&mut self, image: &RgbImage) -> DomainResult<Vec<Detection>> {
        self.detector.predict(image)
    }

    /// Desmontaje en orden estricto: primero la captura (hilo parado, stream liberado), luego el modelo.
    pub fn shutdown(self) {
        let Runner { snapshot, source, detector } = self;
        source.stop();
        drop(source);
        drop(detector);
        info!(hash = %&snapshot.hash()[..12], "Runner liberado");
    }
}
