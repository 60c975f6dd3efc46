//! Motor del pipeline: mantiene un único Runner acorde al snapshot vigente y
//! ejecuta el ciclo detectar → anotar → persistir → informar.
//!
//! Un candado de motor (`cycle`) serializa "comprobar y quizá reconstruir" junto con
//! la detección; el estado y las imágenes van en candados propios para que la UI
//! lea el último valor sin esperar a que termine un ciclo.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::application::annotator::{annotate, encode_jpeg, AnnotatedImages};
use crate::application::frame_source::FrameSourceOptions;
use crate::application::ports::{DetectionSink, DetectorFactory, SettingsSource, StreamOpener};
use crate::application::runner::Runner;
use crate::domain::{
    detection::{Detection, DetectionRecord},
    errors::{DomainResult, ErrorKind, PipelineError},
    settings::ConfigurationSnapshot,
    status::EngineStatus,
    stream::{summarize_detections, Frame, FrameMeta},
};

pub const SNAPSHOT_FILE_NAME: &str = "latest.jpg";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Cota para construir un Runner (modelo + apertura del stream).
    pub connect_timeout: Duration,
    /// Cota de espera por un frame nuevo en cada ciclo.
    pub frame_timeout: Duration,
    pub source: FrameSourceOptions,
    /// Si es `false`, los ajustes solo se releen tras `notify_settings_possibly_changed`.
    pub poll_settings_every_cycle: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            frame_timeout: Duration::from_secs(1),
            source: FrameSourceOptions::default(),
            poll_settings_every_cycle: true,
        }
    }
}

/// Colaboradores inyectados en construcción; el motor no usa estado global.
#[derive(Clone)]
pub struct EngineDeps {
    pub camera_settings: Arc<dyn SettingsSource>,
    pub detector_settings: Arc<dyn SettingsSource>,
    pub opener: Arc<dyn StreamOpener>,
    pub detectors: Arc<dyn DetectorFactory>,
    pub sink: Arc<dyn DetectionSink>,
}

/// Resultado de un ciclo, útil para tests y métricas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    ConfigInvalid,
    RunnerUnavailable,
    NoFrame,
    InferenceFailed,
    Detected { detections: usize },
}

#[derive(Default)]
struct CycleState {
    runner: Option<Runner>,
    snapshot: Option<Arc<ConfigurationSnapshot>>,
    fps_est: f32,
    last_tick: Option<Instant>,
}

#[derive(Default)]
struct StatusCell {
    last_error: Option<PipelineError>,
    reconnect_requested: bool,
    config_hash: Option<String>,
}

pub struct PipelineEngine {
    deps: EngineDeps,
    options: EngineOptions,
    cycle: Mutex<CycleState>,
    status: RwLock<StatusCell>,
    images: RwLock<Option<Arc<AnnotatedImages>>>,
    settings_hint: AtomicBool,
    shut_down: AtomicBool,
    tx: broadcast::Sender<(FrameMeta, Vec<u8>)>,
}

impl PipelineEngine {
    pub fn new(deps: EngineDeps, options: EngineOptions) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            deps,
            options,
            cycle: Mutex::new(CycleState::default()),
            status: RwLock::new(StatusCell::default()),
            images: RwLock::new(None),
            settings_hint: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            tx,
        }
    }

    /// Una iteración completa. Nunca hace panic ni propaga errores: todo acaba en `last_error`.
    pub fn drive_cycle(&self) -> CycleOutcome {
        let mut cycle = self.cycle.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return CycleOutcome::RunnerUnavailable;
        }

        // 1. Snapshot actual; si no es válido no se construye ni se desmonta nada.
        let snapshot = match self.current_snapshot(&mut cycle) {
            Ok(s) => s,
            Err(e) => {
                self.set_error(e);
                return CycleOutcome::ConfigInvalid;
            }
        };

        // 2. Reconstrucción si cambió el hash o se pidió reconexión (como mucho un intento por ciclo).
        let reconnect = self.status.read().reconnect_requested;
        let stale = cycle.runner.as_ref().map_or(true, |r| r.hash() != snapshot.hash());
        if stale || reconnect {
            self.rebuild(&mut cycle, snapshot);
        }

        // 3. Detección.
        let CycleState { runner, fps_est, last_tick, .. } = &mut *cycle;
        let Some(runner) = runner.as_mut() else {
            return CycleOutcome::RunnerUnavailable;
        };

        let frame = match runner.next_frame(self.options.frame_timeout) {
            Ok(frame) => frame,
            Err(e) => {
                if e.is_fatal() {
                    self.status.write().reconnect_requested = true;
                }
                self.set_error(e);
                return CycleOutcome::NoFrame;
            }
        };

        let infer_started = Instant::now();
        let detections = match runner.predict(&frame.image) {
            Ok(d) => d,
            Err(e) => {
                if e.is_fatal() {
                    self.status.write().reconnect_requested = true;
                }
                self.set_error(e);
                return CycleOutcome::InferenceFailed;
            }
        };
        let infer_ms = infer_started.elapsed().as_secs_f32() * 1000.0;

        let now = Instant::now();
        if let Some(prev) = last_tick.replace(now) {
            let dt = now.duration_since(prev).as_secs_f32().max(0.001);
            *fps_est = 0.9 * *fps_est + 0.1 * (1.0 / dt);
        }

        let images = annotate(&frame.image, &detections);
        self.publish(&frame, images, &detections, infer_ms, *fps_est);
        self.clear_error();

        // 4. Persistencia: fallos registrados, nunca llegan a `last_error`.
        let output_folder = runner.snapshot().output_folder().to_path_buf();
        self.persist(&frame, &detections, &output_folder);

        if !detections.is_empty() {
            debug!(summary = %summarize_detections(&detections), infer_ms, "detecciones");
        }
        CycleOutcome::Detected { detections: detections.len() }
    }

    fn current_snapshot(&self, cycle: &mut CycleState) -> DomainResult<Arc<ConfigurationSnapshot>> {
        let hinted = self.settings_hint.swap(false, Ordering::SeqCst);
        if !self.options.poll_settings_every_cycle && !hinted {
            if let Some(snapshot) = &cycle.snapshot {
                return Ok(snapshot.clone());
            }
        }

        let read = |source: &Arc<dyn SettingsSource>| {
            source.read().map_err(|e| match e.kind() {
                ErrorKind::ConfigInvalid => e,
                _ => PipelineError::config("settings", e.to_string()),
            })
        };
        let built = read(&self.deps.camera_settings)
            .and_then(|camera| Ok((camera, read(&self.deps.detector_settings)?)))
            .and_then(|(camera, detector)| ConfigurationSnapshot::from_settings(&camera, &detector));

        let snapshot = match built {
            Ok(s) => s,
            Err(e) => {
                cycle.snapshot = None;
                return Err(e);
            }
        };

        match &cycle.snapshot {
            Some(prev) if **prev == snapshot => Ok(prev.clone()),
            _ => {
                info!(
                    hash = %&snapshot.hash()[..12],
                    address = snapshot.stream_address(),
                    fps = snapshot.target_fps(),
                    threshold = snapshot.detection_threshold(),
                    max_detections = snapshot.max_detections(),
                    "Nueva configuración"
                );
                let snapshot = Arc::new(snapshot);
                cycle.snapshot = Some(snapshot.clone());
                Ok(snapshot)
            }
        }
    }

    fn rebuild(&self, cycle: &mut CycleState, snapshot: Arc<ConfigurationSnapshot>) {
        if let Some(old) = cycle.runner.take() {
            info!(from = %&old.hash()[..12], to = %&snapshot.hash()[..12], "Reconstruyendo Runner");
            old.shutdown();
        }
        // Se limpia antes de construir: una petición que llegue durante la construcción se conserva.
        {
            let mut status = self.status.write();
            status.config_hash = None;
            status.reconnect_requested = false;
        }

        let hash = snapshot.hash().to_string();
        match Runner::build_with_timeout(
            snapshot,
            self.deps.opener.clone(),
            self.deps.detectors.clone(),
            self.options.source.clone(),
            self.options.connect_timeout,
        ) {
            Ok(runner) => {
                self.status.write().config_hash = Some(hash);
                cycle.runner = Some(runner);
                cycle.last_tick = None;
            }
            Err(e) => {
                self.status.write().reconnect_requested = true;
                self.set_error(e);
            }
        }
    }

    fn publish(&self, frame: &Frame, images: AnnotatedImages, detections: &[Detection], infer_ms: f32, fps_est: f32) {
        let images = Arc::new(images);
        *self.images.write() = Some(images.clone());

        if self.tx.receiver_count() == 0 {
            return;
        }
        match encode_jpeg(&images.boxed) {
            Ok(jpeg) => {
                let meta = FrameMeta {
                    width: frame.width(),
                    height: frame.height(),
                    infer_ms,
                    fps_est,
                    detections: detections.to_vec(),
                };
                let _ = self.tx.send((meta, jpeg));
            }
            Err(e) => warn!(error = %e, "no se pudo codificar el frame anotado"),
        }
    }

    fn persist(&self, frame: &Frame, detections: &[Detection], output_folder: &Path) {
        let mut photos: HashMap<&str, Option<PathBuf>> = HashMap::new();
        for det in detections {
            let photo = photos
                .entry(det.label.as_str())
                .or_insert_with(|| match save_snapshot(output_folder, &det.label, frame) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!(label = %det.label, error = %e, "no se pudo guardar la foto");
                        None
                    }
                })
                .clone();

            let record = DetectionRecord::from_detection(det, frame.captured_at, photo);
            if let Err(e) = self.deps.sink.enqueue(record) {
                warn!(label = %det.label, error = %e, "no se pudo encolar la detección");
            }
        }
    }

    fn set_error(&self, error: PipelineError) {
        let mut status = self.status.write();
        if status.last_error.as_ref() != Some(&error) {
            warn!(error = %error, kind = ?error.kind(), "pipeline");
        }
        status.last_error = Some(error);
    }

    fn clear_error(&self) {
        let mut status = self.status.write();
        if status.last_error.take().is_some() {
            info!("Pipeline recuperado");
        }
    }

    /// Últimas imágenes (cruda, anotada). No bloquea el ciclo.
    pub fn get_images(&self) -> Option<Arc<AnnotatedImages>> {
        self.images.read().clone()
    }

    pub fn get_error(&self) -> Option<String> {
        self.status.read().last_error.as_ref().map(ToString::to_string)
    }

    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.status.read().last_error.as_ref().map(PipelineError::kind)
    }

    pub fn status(&self) -> EngineStatus {
        let status = self.status.read();
        EngineStatus {
            last_error: status.last_error.as_ref().map(ToString::to_string),
            reconnect_requested: status.reconnect_requested,
            config_hash: status.config_hash.clone(),
        }
    }

    /// Pide reconstruir el Runner. Se atiende en el siguiente límite de ciclo, nunca a mitad de uno.
    pub fn request_reconnect(&self) {
        info!("Reconexión solicitada");
        self.status.write().reconnect_requested = true;
    }

    pub fn notify_settings_possibly_changed(&self) {
        self.settings_hint.store(true, Ordering::SeqCst);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(FrameMeta, Vec<u8>)> {
        self.tx.subscribe()
    }

    pub fn has_runner(&self) -> bool {
        self.cycle.lock().runner.is_some()
    }

    /// Desmonta el Runner activo. Seguro desde cualquier hilo; espera como mucho a que acabe el ciclo en curso.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let runner = self.cycle.lock().runner.take();
        if let Some(runner) = runner {
            runner.shutdown();
        }
        self.status.write().config_hash = None;
        info!("Motor detenido");
    }
}

/// Etiqueta apta para nombre de carpeta: `[A-Za-z0-9_-]`, el resto pasa a `_`.
pub fn sanitize_label(label: &str) -> String {
    let clean: String = label
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if clean.is_empty() { "unknown".into() } else { clean }
}

/// Guarda `{output_folder}/{label}/latest.jpg` (se sobrescribe en cada detección).
fn save_snapshot(output_folder: &Path, label: &str, frame: &Frame) -> DomainResult<PathBuf> {
    let persist = |e: &dyn std::fmt::Display| PipelineError::PersistFailure(e.to_string());

    let dir = output_folder.join(sanitize_label(label));
    std::fs::create_dir_all(&dir).map_err(|e| persist(&e))?;
    let jpeg = encode_jpeg(&frame.image).map_err(|e| persist(&e))?;

    let path = dir.join(SNAPSHOT_FILE_NAME);
    let tmp = dir.join(format!("{SNAPSHOT_FILE_NAME}.tmp"));
    std::fs::write(&tmp, jpeg).map_err(|e| persist(&e))?;
    std::fs::rename(&tmp, &path).map_err(|e| persist(&e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_sanitized_for_paths() {
        assert_eq!(sanitize_label("traffic light"), "traffic_light");
        assert_eq!(sanitize_label("../etc"), "___etc");
        assert_eq!(sanitize_label("box_without_path"), "box_without_path");
        assert_eq!(sanitize_label("  "), "unknown");
    }
}
