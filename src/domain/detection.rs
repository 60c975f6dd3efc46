use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Caja detectada en coordenadas de píxel del frame original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
    pub label: String,
}

impl Detection {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    pub fn bounding_box(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Registro persistido de una detección. Una vez encolado pertenece al almacén.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub label: String,
    pub confidence: f32,
    pub detection_time: DateTime<Utc>,
    /// `[x1, y1, x2, y2]`
    pub bounding_box: [f32; 4],
    pub photo_path: Option<PathBuf>,
    pub container_reference: Option<u64>,
}

impl DetectionRecord {
    pub fn from_detection(det: &Detection, detection_time: DateTime<Utc>, photo_path: Option<PathBuf>) -> Self {
        Self {
            label: det.label.clone(),
            confidence: det.score,
            detection_time,
            bounding_box: det.bounding_box(),
            photo_path,
            container_reference: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: u64,
    pub name: String,
    pub position: Option<String>,
    pub photo_path: Option<PathBuf>,
}

/// Registro junto con su contenedor, si lo tiene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub record: DetectionRecord,
    pub container: Option<Container>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection { x1, y1, x2, y2, score: 0.9, class_id: 0, label: "person".into() }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = det(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&det(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert!((a.iou(&det(5.0, 0.0, 15.0, 10.0)) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn inverted_box_has_no_area() {
        assert_eq!(det(10.0, 10.0, 0.0, 0.0).area(), 0.0);
    }
}
