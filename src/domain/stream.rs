use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use super::detection::Detection;

/// Imagen decodificada más su instante de captura. `seq` crece de forma estricta por cada Frame Source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
    pub image: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    pub infer_ms: f32,
    pub fps_est: f32,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFrameMetaMessage {
    pub r#type: String,
    pub meta: FrameMeta,
}

/// "2 person, 1 cup" (orden alfabético para que los logs sean estables).
pub fn summarize_detections(detections: &[Detection]) -> String {
    let mut counts = BTreeMap::new();
    for det in detections {
        *counts.entry(det.label.as_str()).or_insert(0) += 1;
    }
    counts.iter()
        .map(|(label, count)| format!("{} {}", count, label))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_labels() {
        let d = |label: &str| Detection {
            x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0, score: 0.5, class_id: 0, label: label.into(),
        };
        let s = summarize_detections(&[d("person"), d("cup"), d("person")]);
        assert_eq!(s, "1 cup, 2 person");
        assert_eq!(summarize_detections(&[]), "");
    }
}
