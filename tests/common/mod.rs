//! Dobles de prueba compartidos por los tests de integración.
#![allow(dead_code)]

use axum::Router;
use camwatch::adapters::http::{router, state::HttpState};
use camwatch::adapters::settings::json_file::{ensure_defaults, JsonSettingsFile};
use camwatch::adapters::storage::sled_store::SledDetectionStore;
use camwatch::application::engine::{EngineDeps, EngineOptions, PipelineEngine};
use camwatch::application::frame_source::FrameSourceOptions;
use camwatch::application::services::{PipelineService, RecordService, SettingsService};
use camwatch::application::ports::{
    DetectionSink, Detector, DetectorFactory, SettingsSource, StreamOpener, VideoStream,
};
use camwatch::domain::detection::{Detection, DetectionRecord};
use camwatch::domain::errors::{DomainResult, PipelineError};
use camwatch::domain::settings::{ConfigurationSnapshot, Receiver, SettingsMap};
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const FRAME_W: u32 = 32;
pub const FRAME_H: u32 = 24;

// ---------------------------------------------------------------------------
// Ajustes en memoria
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySettings {
    map: Mutex<SettingsMap>,
}

impl MemorySettings {
    pub fn with(pairs: &[(&str, &str)]) -> Arc<Self> {
        let map = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Arc::new(Self { map: Mutex::new(map) })
    }

    pub fn set(&self, key: &str, value: &str) {
        self.map.lock().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.map.lock().remove(key);
    }
}

impl SettingsSource for MemorySettings {
    fn read(&self) -> DomainResult<SettingsMap> {
        Ok(self.map.lock().clone())
    }
}

// ---------------------------------------------------------------------------
// Cámara falsa
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCamera {
    pub opened: AtomicUsize,
    pub live: AtomicUsize,
    pub refuse: AtomicBool,
    open_delay: Mutex<Duration>,
    read_delay: Mutex<Duration>,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        let cam = Self::default();
        *cam.read_delay.lock() = Duration::from_millis(2);
        Arc::new(cam)
    }

    pub fn set_open_delay(&self, d: Duration) {
        *self.open_delay.lock() = d;
    }

    pub fn set_read_delay(&self, d: Duration) {
        *self.read_delay.lock() = d;
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Envoltorio para poder pasar el mismo `Arc<FakeCamera>` como `StreamOpener`.
pub struct FakeOpener(pub Arc<FakeCamera>);

impl StreamOpener for FakeOpener {
    fn open(&self, address: &str, _fps: u32) -> DomainResult<Box<dyn VideoStream>> {
        let cam = &self.0;
        cam.opened.fetch_add(1, Ordering::SeqCst);
        let delay = *cam.open_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if cam.refuse.load(Ordering::SeqCst) {
            return Err(PipelineError::connect(address, "connection refused"));
        }
        cam.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream { cam: cam.clone(), n: 0 }))
    }
}

struct FakeStream {
    cam: Arc<FakeCamera>,
    n: u8,
}

impl VideoStream for FakeStream {
    fn read_frame(&mut self) -> DomainResult<RgbImage> {
        std::thread::sleep(*self.cam.read_delay.lock());
        self.n = self.n.wrapping_add(1);
        Ok(RgbImage::from_pixel(FRAME_W, FRAME_H, Rgb([self.n, 80, 160])))
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.cam.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Detector con guion
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedDetectors {
    pub loaded: AtomicUsize,
    pub fail_inference: AtomicBool,
    boxes: Mutex<Vec<Detection>>,
    thresholds: Mutex<Vec<f64>>,
}

impl ScriptedDetectors {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_boxes(&self, boxes: Vec<Detection>) {
        *self.boxes.lock() = boxes;
    }

    pub fn loaded(&self) -> usize {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.thresholds.lock().clone()
    }
}

pub struct DetectorFactoryHandle(pub Arc<ScriptedDetectors>);

impl DetectorFactory for DetectorFactoryHandle {
    fn load(&self, snapshot: &ConfigurationSnapshot) -> DomainResult<Box<dyn Detector>> {
        self.0.loaded.fetch_add(1, Ordering::SeqCst);
        self.0.thresholds.lock().push(snapshot.detection_threshold());
        Ok(Box::new(ScriptedDetector(self.0.clone())))
    }
}

struct ScriptedDetector(Arc<ScriptedDetectors>);

impl Detector for ScriptedDetector {
    fn predict(&mut self, _image: &RgbImage) -> DomainResult<Vec<Detection>> {
        if self.0.fail_inference.load(Ordering::SeqCst) {
            return Err(PipelineError::InferenceError("tensor shape mismatch".into()));
        }
        Ok(self.0.boxes.lock().clone())
    }
}

pub fn boxed(label: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection { x1, y1, x2, y2, score: 0.9, class_id: 0, label: label.into() }
}

// ---------------------------------------------------------------------------
// Sumidero de registros
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    pub fail: AtomicBool,
    records: Mutex<Vec<DetectionRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<DetectionRecord> {
        self.records.lock().clone()
    }
}

impl DetectionSink for RecordingSink {
    fn enqueue(&self, record: DetectionRecord) -> DomainResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::PersistFailure("disk full".into()));
        }
        self.records.lock().push(record);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Montaje del motor
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub camera_settings: Arc<MemorySettings>,
    pub detector_settings: Arc<MemorySettings>,
    pub camera: Arc<FakeCamera>,
    pub detectors: Arc<ScriptedDetectors>,
    pub sink: Arc<RecordingSink>,
    pub engine: Arc<PipelineEngine>,
}

pub fn fast_options() -> EngineOptions {
    EngineOptions {
        connect_timeout: Duration::from_millis(500),
        frame_timeout: Duration::from_millis(500),
        source: FrameSourceOptions {
            reconnect_backoff: Duration::from_millis(5),
            join_timeout: Duration::from_secs(1),
        },
        poll_settings_every_cycle: true,
    }
}

pub fn harness() -> Harness {
    harness_with(fast_options())
}

pub fn harness_with(options: EngineOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("camera");
    let camera_settings = MemorySettings::with(&[("rtsp_url", "fake://cam/1")]);
    let detector_settings = MemorySettings::with(&[
        ("fps", "30"),
        ("threshold", "0.5"),
        ("object_count", "10"),
        ("save_folder", output.to_str().unwrap()),
    ]);
    let camera = FakeCamera::new();
    let detectors = ScriptedDetectors::new();
    let sink = Arc::new(RecordingSink::default());

    let engine = Arc::new(PipelineEngine::new(
        EngineDeps {
            camera_settings: camera_settings.clone(),
            detector_settings: detector_settings.clone(),
            opener: Arc::new(FakeOpener(camera.clone())),
            detectors: Arc::new(DetectorFactoryHandle(detectors.clone())),
            sink: sink.clone(),
        },
        options,
    ));

    Harness { dir, camera_settings, detector_settings, camera, detectors, sink, engine }
}

/// Espera activa hasta que `cond` se cumpla o venza `timeout`.
pub fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ---------------------------------------------------------------------------
// Aplicación HTTP completa (ficheros de ajustes reales y sled temporal)
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub app: Router,
    pub h: Harness,
    pub store: Arc<SledDetectionStore>,
    pub pipeline: Arc<PipelineService>,
    pub model_settings: PathBuf,
}

pub fn build_test_app() -> TestApp {
    let h = harness();
    let camera_path = h.dir.path().join("settings").join("camera_settings.json");
    let model_path = h.dir.path().join("settings").join("model_settings.json");
    ensure_defaults(&camera_path, Receiver::Camera).unwrap();
    ensure_defaults(&model_path, Receiver::Model).unwrap();

    let store = Arc::new(SledDetectionStore::temporary(100).unwrap());
    let pipeline = Arc::new(PipelineService::new(h.engine.clone(), store.clone()));
    let state = HttpState {
        pipeline: pipeline.clone(),
        settings: Arc::new(SettingsService::new(
            Arc::new(JsonSettingsFile::new(&camera_path, Receiver::Camera)),
            Arc::new(JsonSettingsFile::new(&model_path, Receiver::Model)),
            h.engine.clone(),
        )),
        records: Arc::new(RecordService::new(store.clone())),
    };
    TestApp { app: router(state), h, store, pipeline, model_settings: model_path }
}

/// JPEG de 40x30 en el directorio temporal del harness.
pub fn save_photo(t: &TestApp) -> PathBuf {
    let path = t.h.dir.path().join("photo.jpg");
    RgbImage::from_pixel(40, 30, Rgb([10, 20, 30])).save(&path).unwrap();
    path
}

pub fn record(label: &str, photo: Option<PathBuf>) -> DetectionRecord {
    DetectionRecord {
        label: label.into(),
        confidence: 0.8,
        detection_time: chrono::Utc::now(),
        bounding_box: [2.0, 2.0, 20.0, 20.0],
        photo_path: photo,
        container_reference: None,
    }
}
