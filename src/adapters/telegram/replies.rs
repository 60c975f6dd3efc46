//! Textos del bot y lectura de sus argumentos. No depende de Telegram, así se prueba sin red.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use crate::application::dto::{ObjectPhoto, ObjectResponse, SettingEntry, SettingsPayload, StatusResponse};
use crate::domain::settings::Receiver;

const HIDDEN_KEYS: [&str; 1] = ["password"];

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Receptor desconocido '{0}' (camera | model)")]
    UnknownReceiver(String),
    #[error("Uso: /changesettings <camera|model> clave=valor [clave=valor ...] o el JSON de /settings")]
    Usage,
    #[error("Falta '=' en '{0}'")]
    MissingEquals(String),
    #[error("JSON de ajustes inválido: {0}")]
    InvalidJson(String),
}

pub fn parse_receiver(raw: &str) -> Result<Receiver, CommandError> {
    Receiver::parse(raw).ok_or_else(|| CommandError::UnknownReceiver(raw.trim().to_string()))
}

/// Acepta `model threshold=0.6 fps=10` o el mismo JSON que recibe `POST /settings`.
/// En la forma corta los valores no pueden llevar espacios.
pub fn parse_settings_change(raw: &str) -> Result<SettingsPayload, CommandError> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        return serde_json::from_str(raw).map_err(|e| CommandError::InvalidJson(e.to_string()));
    }

    let mut words = raw.split_whitespace();
    let receiver = parse_receiver(words.next().ok_or(CommandError::Usage)?)?;
    let settings = words
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(SettingEntry { key: key.into(), value: value.into() }),
            _ => Err(CommandError::MissingEquals(pair.to_string())),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if settings.is_empty() {
        return Err(CommandError::Usage);
    }
    Ok(SettingsPayload { receiver, settings })
}

fn receiver_emoji(receiver: Receiver) -> &'static str {
    match receiver {
        Receiver::Camera => "📷",
        Receiver::Model => "🧠",
    }
}

pub fn format_settings(payload: &SettingsPayload) -> String {
    let mut text = format!("{} Ajustes de {}:", receiver_emoji(payload.receiver), payload.receiver.as_str());
    if payload.settings.is_empty() {
        text.push_str("\n(sin ajustes)");
    }
    for SettingEntry { key, value } in &payload.settings {
        let shown = if HIDDEN_KEYS.contains(&key.as_str()) && !value.is_empty() { "••••" } else { value.as_str() };
        text.push_str(&format!("\n• {key} = {shown}"));
    }
    text
}

pub fn object_caption(object: &ObjectResponse) -> String {
    let record = &object.record;
    let mut caption = format!(
        "{} ({:.0}%) visto el {}",
        record.label,
        record.confidence * 100.0,
        record.detection_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(container) = &object.container {
        caption.push_str(&format!("\n📦 {}", container.name));
        if let Some(position) = &container.position {
            caption.push_str(&format!(" ({position})"));
        }
    }
    caption
}

pub fn status_text(status: &StatusResponse) -> String {
    let mut text = match &status.error {
        None => "✅ Pipeline en marcha".to_string(),
        Some(error) => format!("⚠️ {error}"),
    };
    if status.reconnect_requested {
        text.push_str("\n🔄 Reconexión pendiente");
    }
    text.push_str(&format!("\n🗂 {} registros pendientes de guardar", status.pending_records));
    text
}

pub fn decode_photo(photo: &ObjectPhoto) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(&photo.image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::detection::{Container, DetectionRecord};
    use chrono::{TimeZone, Utc};

    #[test]
    fn short_form_settings_change() {
        let payload = parse_settings_change(" model threshold=0.6  fps=10 ").unwrap();
        assert_eq!(payload.receiver, Receiver::Model);
        assert_eq!(
            payload.into_pairs(),
            vec![("threshold".to_string(), "0.6".to_string()), ("fps".to_string(), "10".to_string())]
        );
    }

    #[test]
    fn json_form_settings_change() {
        let payload =
            parse_settings_change(r#"{"receiver":"camera","settings":[{"key":"rtsp_url","value":"rtsp://cam/1"}]}"#)
                .unwrap();
        assert_eq!(payload.receiver, Receiver::Camera);
        assert_eq!(payload.settings[0].value, "rtsp://cam/1");
    }

    #[test]
    fn malformed_settings_changes_explain_themselves() {
        assert_eq!(parse_settings_change(""), Err(CommandError::Usage));
        assert_eq!(parse_settings_change("model"), Err(CommandError::Usage));
        assert_eq!(parse_settings_change("db fps=1"), Err(CommandError::UnknownReceiver("db".into())));
        assert_eq!(parse_settings_change("model fps"), Err(CommandError::MissingEquals("fps".into())));
        assert_eq!(parse_settings_change("model =3"), Err(CommandError::MissingEquals("=3".into())));
        assert!(matches!(parse_settings_change("{nope"), Err(CommandError::InvalidJson(_))));
    }

    #[test]
    fn passwords_are_not_echoed() {
        let payload = SettingsPayload {
            receiver: Receiver::Camera,
            settings: vec![
                SettingEntry { key: "login".into(), value: "admin".into() },
                SettingEntry { key: "password".into(), value: "hunter2".into() },
            ],
        };
        let text = format_settings(&payload);
        assert!(text.starts_with("📷 Ajustes de camera:"));
        assert!(text.contains("• login = admin"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn caption_includes_container() {
        let object = ObjectResponse {
            photo: ObjectPhoto { height: 1, width: 1, image: String::new() },
            record: DetectionRecord {
                label: "cup".into(),
                confidence: 0.87,
                detection_time: Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap(),
                bounding_box: [0.0, 0.0, 1.0, 1.0],
                photo_path: None,
                container_reference: Some(7),
            },
            container: Some(Container { id: 7, name: "shelf".into(), position: Some("B2".into()), photo_path: None }),
        };
        assert_eq!(object_caption(&object), "cup (87%) visto el 2026-10-16 09:30:00 UTC\n📦 shelf (B2)");
    }

    #[test]
    fn status_mentions_errors_and_pending_reconnect() {
        let status = StatusResponse {
            error: Some("no frames available".into()),
            reconnect_requested: true,
            config_hash: None,
            pending_records: 3,
        };
        let text = status_text(&status);
        assert!(text.contains("⚠️ no frames available"));
        assert!(text.contains("Reconexión pendiente"));
        assert!(text.contains("3 registros"));
    }
}
