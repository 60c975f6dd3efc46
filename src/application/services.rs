use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::{
    application::{
        annotator::{draw_boxes, encode_jpeg},
        dto::{FrameKind, ObjectPhoto, ObjectResponse, SettingEntry, SettingsPayload, StatusResponse},
        engine::PipelineEngine,
        ports::{DetectionStore, SettingsStorePort},
    },
    domain::{
        detection::StoredObject,
        errors::{DomainResult, PipelineError},
        settings::Receiver,
        stream::FrameMeta,
    },
};

/// Casos de uso sobre el motor en marcha: estado, último frame y reconexión.
#[derive(Clone)]
pub struct PipelineService {
    engine: Arc<PipelineEngine>,
    store: Arc<dyn DetectionStore>,
}

impl PipelineService {
    pub fn new(engine: Arc<PipelineEngine>, store: Arc<dyn DetectionStore>) -> Self {
        Self { engine, store }
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse::new(self.engine.status(), self.store.pending())
    }

    /// Último frame en JPEG; `NotFound` hasta que el primer ciclo termine.
    pub async fn latest_frame_jpeg(&self, kind: FrameKind) -> DomainResult<Vec<u8>> {
        let images = self
            .engine
            .get_images()
            .ok_or_else(|| PipelineError::NotFound("todavía no hay frames".into()))?;
        tokio::task::spawn_blocking(move || {
            let img = match kind {
                FrameKind::Raw => &images.raw,
                FrameKind::Boxed => &images.boxed,
            };
            encode_jpeg(img).map_err(|e| PipelineError::ReadFailure(e.to_string()))
        })
        .await
        .map_err(|e| PipelineError::ReadFailure(e.to_string()))?
    }

    pub fn request_reconnect(&self) {
        self.engine.request_reconnect();
    }

    /// Receptor del canal de difusión donde se publican los frames anotados.
    pub fn subscribe(&self) -> broadcast::Receiver<(FrameMeta, Vec<u8>)> {
        self.engine.subscribe()
    }
}

/// Lectura y escritura de los ficheros de ajustes. Cada escritura avisa al motor.
#[derive(Clone)]
pub struct SettingsService {
    camera: Arc<dyn SettingsStorePort>,
    model: Arc<dyn SettingsStorePort>,
    engine: Arc<PipelineEngine>,
}

impl SettingsService {
    pub fn new(
        camera: Arc<dyn SettingsStorePort>,
        model: Arc<dyn SettingsStorePort>,
        engine: Arc<PipelineEngine>,
    ) -> Self {
        Self { camera, model, engine }
    }

    fn store(&self, receiver: Receiver) -> &Arc<dyn SettingsStorePort> {
        match receiver {
            Receiver::Camera => &self.camera,
            Receiver::Model => &self.model,
        }
    }

    pub async fn get(&self, receiver: Receiver) -> DomainResult<SettingsPayload> {
        let settings = self.store(receiver).load().await?;
        Ok(SettingsPayload {
            receiver,
            settings: settings.into_iter().map(SettingEntry::from).collect(),
        })
    }

    pub async fn update(&self, payload: SettingsPayload) -> DomainResult<()> {
        let receiver = payload.receiver;
        self.store(receiver).update(payload.into_pairs()).await?;
        tracing::info!(receiver = receiver.as_str(), "Ajustes actualizados");
        self.engine.notify_settings_possibly_changed();
        Ok(())
    }
}

/// Consultas sobre el almacén de detecciones para la interfaz.
#[derive(Clone)]
pub struct RecordService {
    store: Arc<dyn DetectionStore>,
}

impl RecordService {
    pub fn new(store: Arc<dyn DetectionStore>) -> Self {
        Self { store }
    }

    /// Último registro de `name` con su foto y la caja dibujada.
    pub async fn object(&self, name: String) -> DomainResult<ObjectResponse> {
        let store = self.store.clone();
        run_blocking(move || {
            let stored = store
                .query_latest(&name)?
                .ok_or_else(|| PipelineError::NotFound(format!("sin registros de '{name}'")))?;
            let path = stored
                .record
                .photo_path
                .clone()
                .ok_or_else(|| PipelineError::NotFound(format!("'{name}' no tiene foto")))?;
            let photo = render_photo(&path, [(stored.record.bounding_box, stored.record.label.as_str())])?;
            let StoredObject { record, container } = stored;
            Ok(ObjectResponse { photo, record, container })
        })
        .await
    }

    /// Foto del primer registro del último instante con todas las cajas de ese instante.
    pub async fn objects(&self) -> DomainResult<ObjectPhoto> {
        let store = self.store.clone();
        run_blocking(move || {
            let latest = store.query_all_at_latest_timestamp()?;
            let path = latest
                .iter()
                .find_map(|o| o.record.photo_path.clone())
                .ok_or_else(|| PipelineError::NotFound("no hay detecciones con foto".into()))?;
            render_photo(&path, latest.iter().map(|o| (o.record.bounding_box, o.record.label.as_str())))
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> DomainResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> DomainResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::ReadFailure(e.to_string()))?
}

fn render_photo<'a>(path: &Path, boxes: impl IntoIterator<Item = ([f32; 4], &'a str)>) -> DomainResult<ObjectPhoto> {
    let mut img: RgbImage = image::open(path)
        .map_err(|e| PipelineError::NotFound(format!("foto {}: {e}", path.display())))?
        .to_rgb8();
    draw_boxes(&mut img, boxes);
    let jpeg = encode_jpeg(&img).map_err(|e| PipelineError::ReadFailure(e.to_string()))?;
    Ok(ObjectPhoto {
        height: img.height(),
        width: img.width(),
        image: STANDARD.encode(jpeg),
    })
}
