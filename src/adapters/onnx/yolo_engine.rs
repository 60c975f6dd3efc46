use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array4, ArrayView2, ArrayViewD, Axis, IxDyn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;
use ort::value::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::application::ports::{Detector, DetectorFactory};
use crate::domain::detection::Detection;
use crate::domain::errors::{DomainResult, PipelineError};
use crate::domain::settings::ConfigurationSnapshot;

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Parámetros de post-proceso de YOLO para un snapshot concreto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloParams {
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

pub struct OnnxYoloEngine {
    session: Session,
}

impl OnnxYoloEngine {
    pub fn load(path: &Path) -> Result<Self> {
        let mut builder = Session::builder()?.with_intra_threads(4)?;

        // CUDA es opcional: si está disponible se registra, si no continuamos en CPU.
        let cuda = CUDAExecutionProvider::default().build();
        if let Ok(builder_with_cuda) = builder.clone().with_execution_providers([cuda]) {
            builder = builder_with_cuda;
        }

        let model_bytes = fs::read(path).with_context(|| format!("leyendo {}", path.display()))?;
        let session = builder.commit_from_memory(&model_bytes)?;

        Ok(Self { session })
    }

    pub fn infer(&mut self, rgb: &RgbImage, params: &YoloParams) -> Result<Vec<Detection>> {
        let imgsz = params.input_size as usize;
        let resized = image::imageops::resize(rgb, imgsz as u32, imgsz as u32, FilterType::Nearest);

        let mut input = Array4::<f32>::zeros((1, 3, imgsz, imgsz));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        let input_shape = vec![1, 3, imgsz as i64, imgsz as i64];
        let input_tensor = Value::from_array((input_shape, input.into_raw_vec_and_offset().0))?;

        let outputs = self.session.run(ort::inputs![input_tensor])?;
        let (shape_out, data_out) = outputs[0].try_extract_tensor::<f32>()?;

        let dims: Vec<usize> = shape_out.iter().map(|&x| x as usize).collect();
        let array_view = ArrayViewD::from_shape(IxDyn(&dims), data_out)?;
        let view = array_view
            .index_axis(Axis(0), 0)
            .into_dimensionality::<ndarray::Ix2>()
            .context("salida YOLO inesperada: se esperaba [1, 4 + clases, candidatos]")?;

        Ok(decode_output(view, rgb.width(), rgb.height(), params))
    }
}

/// Salida `[4 + clases, candidatos]` (cx, cy, w, h, puntuaciones) a detecciones en píxeles del frame.
pub fn decode_output(view: ArrayView2<'_, f32>, width: u32, height: u32, params: &YoloParams) -> Vec<Detection> {
    if view.shape()[0] <= 4 {
        return Vec::new();
    }
    let imgsz = params.input_size as f32;
    let sx = width as f32 / imgsz;
    let sy = height as f32 / imgsz;

    let mut candidates = Vec::new();
    for i in 0..view.shape()[1] {
        let scores = view.slice(s![4.., i]);
        let Some((class_id, &score)) = scores.indexed_iter().max_by(|(_, a), (_, b)| a.total_cmp(b)) else {
            continue;
        };
        if score < params.conf_threshold {
            continue;
        }
        let (cx, cy, w, h) = (view[[0, i]], view[[1, i]], view[[2, i]], view[[3, i]]);
        candidates.push(Detection {
            x1: ((cx - w / 2.0) * sx).max(0.0),
            y1: ((cy - h / 2.0) * sy).max(0.0),
            x2: ((cx + w / 2.0) * sx).min(width as f32),
            y2: ((cy + h / 2.0) * sy).min(height as f32),
            score,
            class_id,
            label: COCO_CLASSES.get(class_id).copied().unwrap_or("object").to_string(),
        });
    }

    let mut kept = nms(candidates, params.iou_threshold);
    kept.truncate(params.max_detections);
    kept
}

/// NMS por clase. Devuelve las cajas supervivientes ordenadas por puntuación descendente.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.iou(&det) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

/// Un motor ONNX ligado a los umbrales de un snapshot.
pub struct OnnxDetector {
    engine: OnnxYoloEngine,
    params: YoloParams,
}

impl Detector for OnnxDetector {
    fn predict(&mut self, image: &RgbImage) -> DomainResult<Vec<Detection>> {
        self.engine
            .infer(image, &self.params)
            .map_err(|e| PipelineError::InferenceError(format!("{e:#}")))
    }
}

pub struct OnnxDetectorFactory {
    model_path: PathBuf,
    input_size: u32,
    iou_threshold: f32,
}

impl OnnxDetectorFactory {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            input_size: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Comprobación previa antes de tocar ONNX Runtime.
    pub fn validate(&self) -> DomainResult<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(PipelineError::config("model_path", "ruta vacía"));
        }
        if !self.model_path.is_file() {
            return Err(PipelineError::config(
                "model_path",
                format!("modelo no encontrado: {}", self.model_path.display()),
            ));
        }
        Ok(())
    }

    pub fn params_for(&self, snapshot: &ConfigurationSnapshot) -> YoloParams {
        YoloParams {
            input_size: self.input_size,
            conf_threshold: snapshot.detection_threshold() as f32,
            iou_threshold: self.iou_threshold,
            max_detections: snapshot.max_detections(),
        }
    }
}

impl DetectorFactory for OnnxDetectorFactory {
    fn load(&self, snapshot: &ConfigurationSnapshot) -> DomainResult<Box<dyn Detector>> {
        self.validate()?;
        let engine = OnnxYoloEngine::load(&self.model_path)
            .map_err(|e| PipelineError::InferenceError(format!("no se pudo cargar el modelo: {e:#}")))?;
        let params = self.params_for(snapshot);
        tracing::info!(model = %self.model_path.display(), ?params, "Modelo ONNX cargado");
        Ok(Box::new(OnnxDetector { engine, params }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn params(max_detections: usize) -> YoloParams {
        YoloParams { input_size: 640, conf_threshold: 0.5, iou_threshold: 0.45, max_detections }
    }

    /// Columnas: (cx, cy, w, h, clase, puntuación), 3 clases.
    fn output(rows: &[(f32, f32, f32, f32, usize, f32)]) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((7, rows.len()));
        for (i, &(cx, cy, w, h, class, score)) in rows.iter().enumerate() {
            out[[0, i]] = cx;
            out[[1, i]] = cy;
            out[[2, i]] = w;
            out[[3, i]] = h;
            out[[4 + class, i]] = score;
        }
        out
    }

    #[test]
    fn decodes_and_scales_to_frame_pixels() {
        let out = output(&[(320.0, 320.0, 100.0, 200.0, 0, 0.9)]);
        let dets = decode_output(out.view(), 1280, 640, &params(10));
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!(d.label, "person");
        assert_eq!([d.x1, d.y1, d.x2, d.y2], [540.0, 220.0, 740.0, 420.0]);
    }

    #[test]
    fn below_threshold_is_dropped() {
        let out = output(&[(100.0, 100.0, 10.0, 10.0, 1, 0.49)]);
        assert!(decode_output(out.view(), 640, 640, &params(10)).is_empty());
    }

    #[test]
    fn nms_is_class_aware_and_max_detections_applies() {
        let out = output(&[
            (100.0, 100.0, 50.0, 50.0, 0, 0.9),
            (102.0, 101.0, 50.0, 50.0, 0, 0.8),
            (102.0, 101.0, 50.0, 50.0, 2, 0.7),
            (400.0, 400.0, 50.0, 50.0, 1, 0.6),
        ]);
        let dets = decode_output(out.view(), 640, 640, &params(10));
        let labels: Vec<_> = dets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, ["person", "car", "bicycle"]);

        let top = decode_output(out.view(), 640, 640, &params(2));
        assert_eq!(top.len(), 2);
        assert!(top[0].score >= top[1].score);
    }

    #[test]
    fn missing_model_is_a_config_error() {
        let f = OnnxDetectorFactory::new("/no/such/model.onnx");
        let err = f.validate().unwrap_err();
        assert_eq!(err.kind(), crate::domain::errors::ErrorKind::ConfigInvalid);
    }
}
