use async_trait::async_trait;
use image::RgbImage;
use std::time::Duration;

use crate::domain::{
    detection::{Container, Detection, DetectionRecord, StoredObject},
    errors::DomainResult,
    settings::{ConfigurationSnapshot, Receiver, SettingsMap},
};

/// Fuente de ajustes clave-valor (una para la cámara, otra para el detector).
pub trait SettingsSource: Send + Sync {
    fn read(&self) -> DomainResult<SettingsMap>;
}

/// Lectura/escritura asíncrona de ajustes para la fachada HTTP.
#[async_trait]
pub trait SettingsStorePort: Send + Sync {
    fn receiver(&self) -> Receiver;
    async fn load(&self) -> DomainResult<Vec<(String, String)>>;
    /// Solo se permiten claves que ya existen.
    async fn update(&self, values: Vec<(String, String)>) -> DomainResult<()>;
}

/// Conexión abierta con la cámara. Soltar el valor libera el dispositivo.
pub trait VideoStream: Send {
    fn read_frame(&mut self) -> DomainResult<RgbImage>;
}

pub trait StreamOpener: Send + Sync {
    fn open(&self, address: &str, fps: u32) -> DomainResult<Box<dyn VideoStream>>;

    /// Máximo que puede bloquear un `open` o un `read_frame` de los streams de este opener.
    /// La parada de la captura espera al menos esto antes de rendirse.
    fn max_block(&self) -> Duration {
        Duration::ZERO
    }
}

pub trait Detector: Send {
    fn predict(&mut self, image: &RgbImage) -> DomainResult<Vec<Detection>>;
}

/// Carga un detector ligado a los umbrales de un snapshot.
pub trait DetectorFactory: Send + Sync {
    fn load(&self, snapshot: &ConfigurationSnapshot) -> DomainResult<Box<dyn Detector>>;
}

/// Lado de escritura del almacén: no bloquea, solo encola.
pub trait DetectionSink: Send + Sync {
    fn enqueue(&self, record: DetectionRecord) -> DomainResult<()>;
}

pub trait DetectionStore: DetectionSink {
    /// Escribe lo encolado y devuelve cuántos registros se guardaron.
    fn flush(&self) -> DomainResult<usize>;
    fn pending(&self) -> usize;
    fn query_latest(&self, name: &str) -> DomainResult<Option<StoredObject>>;
    fn query_all_at_latest_timestamp(&self) -> DomainResult<Vec<StoredObject>>;
    fn register_container(&self, name: &str, position: Option<String>, photo_path: Option<std::path::PathBuf>) -> DomainResult<Container>;
}
