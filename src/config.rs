use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::application::engine::EngineOptions;

/// Configuración del servicio leída de variables de entorno (y `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind: String,
    pub camera_settings: PathBuf,
    pub model_settings: PathBuf,
    pub db_path: PathBuf,
    pub model_path: PathBuf,
    pub drive_interval: Duration,
    pub flush_interval: Duration,
    pub connect_timeout: Duration,
    pub frame_timeout: Duration,
    pub static_dir: PathBuf,
}

impl AppConfig {
    /// | Variable                       | Por defecto                     |
    /// |--------------------------------|---------------------------------|
    /// | `CAMWATCH_BIND`                | `0.0.0.0:8090`                  |
    /// | `CAMWATCH_CAMERA_SETTINGS`     | `settings/camera_settings.json` |
    /// | `CAMWATCH_MODEL_SETTINGS`      | `settings/model_settings.json`  |
    /// | `CAMWATCH_DB_PATH`             | `data_db`                       |
    /// | `CAMWATCH_MODEL_PATH`          | `models/yolo11n.onnx`           |
    /// | `CAMWATCH_DRIVE_INTERVAL_MS`   | `100`                           |
    /// | `CAMWATCH_FLUSH_INTERVAL_SECS` | `5`                             |
    /// | `CAMWATCH_CONNECT_TIMEOUT_MS`  | `5000`                          |
    /// | `CAMWATCH_FRAME_TIMEOUT_MS`    | `1000`                          |
    /// | `CAMWATCH_STATIC_DIR`          | `static`                        |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} debe ser un entero sin signo (valor: '{raw}')")),
                None => Ok(default),
            }
        };

        Ok(Self {
            bind: text("CAMWATCH_BIND", "0.0.0.0:8090"),
            camera_settings: text("CAMWATCH_CAMERA_SETTINGS", "settings/camera_settings.json").into(),
            model_settings: text("CAMWATCH_MODEL_SETTINGS", "settings/model_settings.json").into(),
            db_path: text("CAMWATCH_DB_PATH", "data_db").into(),
            model_path: text("CAMWATCH_MODEL_PATH", "models/yolo11n.onnx").into(),
            drive_interval: Duration::from_millis(number("CAMWATCH_DRIVE_INTERVAL_MS", 100)?),
            flush_interval: Duration::from_secs(number("CAMWATCH_FLUSH_INTERVAL_SECS", 5)?),
            connect_timeout: Duration::from_millis(number("CAMWATCH_CONNECT_TIMEOUT_MS", 5000)?),
            frame_timeout: Duration::from_millis(number("CAMWATCH_FRAME_TIMEOUT_MS", 1000)?),
            static_dir: text("CAMWATCH_STATIC_DIR", "static").into(),
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            connect_timeout: self.connect_timeout,
            frame_timeout: self.frame_timeout,
            ..EngineOptions::default()
        }
    }
}

/// Configuración del bot de Telegram (`camwatch-bot`).
#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub api_url: String,
    pub token: String,
}

impl BotConfig {
    /// | Variable           | Por defecto             |
    /// |--------------------|-------------------------|
    /// | `CAMWATCH_API_URL` | `http://127.0.0.1:8090` |
    /// | `TELOXIDE_TOKEN`   | obligatoria             |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let token = lookup("TELOXIDE_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .context("TELOXIDE_TOKEN no está definida")?;
        Ok(Self {
            api_url: lookup("CAMWATCH_API_URL").unwrap_or_else(|| "http://127.0.0.1:8090".to_string()),
            token,
        })
    }
}
