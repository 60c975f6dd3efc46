use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::errors::{DomainResult, PipelineError};

/// Contenido plano de una fuente de ajustes (clave → valor como texto).
pub type SettingsMap = HashMap<String, String>;

/// Ruta por defecto cuando la URL RTSP se compone a partir de ip/puerto/credenciales.
pub const DEFAULT_STREAM_PATH: &str = "/stream";

/// Las dos fuentes de ajustes que alimentan el snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Receiver {
    Camera,
    Model,
}

impl Receiver {
    pub fn as_str(self) -> &'static str {
        match self {
            Receiver::Camera => "camera",
            Receiver::Model => "model",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "camera" => Some(Receiver::Camera),
            "model" => Some(Receiver::Model),
            _ => None,
        }
    }
}

/// Campos obligatorios del snapshot. El orden coincide con `RULES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingField {
    StreamAddress,
    TargetFps,
    DetectionThreshold,
    MaxDetections,
    OutputFolder,
}

impl SettingField {
    pub const ALL: [SettingField; 5] = [
        SettingField::StreamAddress,
        SettingField::TargetFps,
        SettingField::DetectionThreshold,
        SettingField::MaxDetections,
        SettingField::OutputFolder,
    ];

    /// Clave en el fichero JSON correspondiente.
    pub fn key(self) -> &'static str {
        match self {
            SettingField::StreamAddress => "rtsp_url",
            SettingField::TargetFps => "fps",
            SettingField::DetectionThreshold => "threshold",
            SettingField::MaxDetections => "object_count",
            SettingField::OutputFolder => "save_folder",
        }
    }

    pub fn receiver(self) -> Receiver {
        match self {
            SettingField::StreamAddress => Receiver::Camera,
            _ => Receiver::Model,
        }
    }

    fn rule(self) -> &'static FieldRule {
        &RULES[self as usize]
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Text(String),
    Count(i64),
    Ratio(f64),
}

type Coerce = fn(&str) -> Result<FieldValue, String>;
type Validate = fn(&FieldValue) -> Result<(), String>;

struct FieldRule {
    field: SettingField,
    coerce: Coerce,
    validate: Validate,
}

static RULES: [FieldRule; 5] = [
    FieldRule { field: SettingField::StreamAddress, coerce: coerce_text, validate: validate_stream_address },
    FieldRule { field: SettingField::TargetFps, coerce: coerce_count, validate: validate_positive },
    FieldRule { field: SettingField::DetectionThreshold, coerce: coerce_ratio, validate: validate_unit_interval },
    FieldRule { field: SettingField::MaxDetections, coerce: coerce_count, validate: validate_positive },
    FieldRule { field: SettingField::OutputFolder, coerce: coerce_text, validate: validate_non_empty },
];

fn coerce_text(raw: &str) -> Result<FieldValue, String> {
    Ok(FieldValue::Text(raw.trim().to_string()))
}

fn coerce_count(raw: &str) -> Result<FieldValue, String> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(FieldValue::Count(n));
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(FieldValue::Count(f as i64)),
        Ok(_) => Err(format!("'{raw}' no es un entero")),
        Err(_) => Err(format!("'{raw}' no es un número")),
    }
}

fn coerce_ratio(raw: &str) -> Result<FieldValue, String> {
    let raw = raw.trim();
    raw.parse::<f64>()
        .map(FieldValue::Ratio)
        .map_err(|_| format!("'{raw}' no es un número"))
}

fn validate_stream_address(value: &FieldValue) -> Result<(), String> {
    validate_non_empty(value)?;
    match value {
        FieldValue::Text(s) if s.chars().any(char::is_whitespace) => {
            Err("la dirección del stream no puede contener espacios".into())
        }
        _ => Ok(()),
    }
}

fn validate_non_empty(value: &FieldValue) -> Result<(), String> {
    match value {
        FieldValue::Text(s) if s.is_empty() => Err("no puede estar vacío".into()),
        _ => Ok(()),
    }
}

fn validate_positive(value: &FieldValue) -> Result<(), String> {
    match value {
        FieldValue::Count(n) if *n <= 0 => Err("debe ser un entero positivo".into()),
        FieldValue::Count(n) if *n > i64::from(u32::MAX) => Err("valor demasiado grande".into()),
        _ => Ok(()),
    }
}

fn validate_unit_interval(value: &FieldValue) -> Result<(), String> {
    match value {
        FieldValue::Ratio(r) if !(0.0..=1.0).contains(r) => Err("debe estar entre 0 y 1".into()),
        _ => Ok(()),
    }
}

/// Construye `rtsp://login:password@ip:port/stream` a partir de los campos sueltos de la cámara.
pub fn compose_rtsp_url(camera: &SettingsMap) -> Option<String> {
    let get = |k: &str| camera.get(k).map(|v| v.trim()).unwrap_or("");
    let ip = get("ip");
    if ip.is_empty() {
        return None;
    }
    let (login, password, port) = (get("login"), get("password"), get("port"));

    let mut url = match (login.is_empty(), password.is_empty()) {
        (false, false) => format!("rtsp://{login}:{password}@{ip}"),
        (false, true) => format!("rtsp://{login}@{ip}"),
        _ => format!("rtsp://{ip}"),
    };
    if !port.is_empty() {
        url.push(':');
        url.push_str(port);
    }
    url.push_str(DEFAULT_STREAM_PATH);
    Some(url)
}

/// Dirección configurada en los ajustes de cámara: `rtsp_url` o, si está vacía, la compuesta.
pub fn configured_stream_address(camera: &SettingsMap) -> Option<String> {
    camera
        .get(SettingField::StreamAddress.key())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| compose_rtsp_url(camera))
}

fn raw_value(field: SettingField, camera: &SettingsMap, detector: &SettingsMap) -> Option<String> {
    if field == SettingField::StreamAddress {
        return configured_stream_address(camera);
    }
    let source = match field.receiver() {
        Receiver::Camera => camera,
        Receiver::Model => detector,
    };
    source.get(field.key()).filter(|v| !v.trim().is_empty()).cloned()
}

fn resolve(field: SettingField, camera: &SettingsMap, detector: &SettingsMap) -> DomainResult<FieldValue> {
    let rule = field.rule();
    debug_assert_eq!(rule.field, field);

    let raw = raw_value(field, camera, detector)
        .ok_or_else(|| PipelineError::config(field.key(), "campo obligatorio ausente"))?;
    let value = (rule.coerce)(&raw).map_err(|reason| PipelineError::config(field.key(), reason))?;
    (rule.validate)(&value).map_err(|reason| PipelineError::config(field.key(), reason))?;
    Ok(value)
}

fn mismatch(field: SettingField) -> PipelineError {
    PipelineError::config(field.key(), "tipo de valor inesperado")
}

/// Forma canónica usada para el hash: el orden de los campos es fijo.
#[derive(Serialize)]
struct CanonicalView<'a> {
    stream_address: &'a str,
    target_fps: u32,
    detection_threshold: f64,
    max_detections: u32,
    output_folder: &'a str,
}

/// Descripción inmutable de cómo conectar con la cámara y cómo debe comportarse el detector.
#[derive(Debug, Clone)]
pub struct ConfigurationSnapshot {
    stream_address: String,
    target_fps: u32,
    detection_threshold: f64,
    max_detections: u32,
    output_folder: PathBuf,
    canonical: Vec<u8>,
    hash: String,
}

impl ConfigurationSnapshot {
    /// Fusiona las dos fuentes. Cualquier campo ausente o inválido hace fallar la construcción completa.
    pub fn from_settings(camera: &SettingsMap, detector: &SettingsMap) -> DomainResult<Self> {
        let stream_address = match resolve(SettingField::StreamAddress, camera, detector)? {
            FieldValue::Text(s) => s,
            _ => return Err(mismatch(SettingField::StreamAddress)),
        };
        let target_fps = match resolve(SettingField::TargetFps, camera, detector)? {
            FieldValue::Count(n) => n as u32,
            _ => return Err(mismatch(SettingField::TargetFps)),
        };
        let detection_threshold = match resolve(SettingField::DetectionThreshold, camera, detector)? {
            FieldValue::Ratio(r) => r,
            _ => return Err(mismatch(SettingField::DetectionThreshold)),
        };
        let max_detections = match resolve(SettingField::MaxDetections, camera, detector)? {
            FieldValue::Count(n) => n as u32,
            _ => return Err(mismatch(SettingField::MaxDetections)),
        };
        let output_folder = match resolve(SettingField::OutputFolder, camera, detector)? {
            FieldValue::Text(s) => PathBuf::from(s),
            _ => return Err(mismatch(SettingField::OutputFolder)),
        };

        std::fs::create_dir_all(&output_folder).map_err(|e| {
            PipelineError::config(SettingField::OutputFolder.key(), format!("no se pudo crear: {e}"))
        })?;

        let output_str = output_folder.to_string_lossy();
        let canonical = serde_json::to_vec(&CanonicalView {
            stream_address: &stream_address,
            target_fps,
            detection_threshold,
            max_detections,
            output_folder: &output_str,
        })
        .map_err(|e| PipelineError::config("snapshot", e.to_string()))?;
        let hash = hex::encode(Sha256::digest(&canonical));

        Ok(Self {
            stream_address,
            target_fps,
            detection_threshold,
            max_detections,
            output_folder,
            canonical,
            hash,
        })
    }

    pub fn stream_address(&self) -> &str {
        &self.stream_address
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn detection_threshold(&self) -> f64 {
        self.detection_threshold
    }

    pub fn max_detections(&self) -> usize {
        self.max_detections as usize
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    /// SHA-256 hexadecimal de la serialización canónica.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl PartialEq for ConfigurationSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ConfigurationSnapshot {}
