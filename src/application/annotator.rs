use ab_glyph::{FontRef, PxScale};
use image::{codecs::jpeg::JpegEncoder, ExtendedColorType, ImageResult, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use std::sync::OnceLock;

use crate::domain::detection::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_WIDTH: u32 = 4;
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_PX: f32 = 18.0;
const LABEL_PAD: u32 = 2;
const JPEG_QUALITY: u8 = 80;

static LABEL_FONT_BYTES: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

fn label_font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(LABEL_FONT_BYTES) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "fuente de etiquetas inválida; se dibujan solo las cajas");
            None
        }
    })
    .as_ref()
}

/// Par de imágenes listo para pintar: el frame tal cual y el frame con las cajas.
#[derive(Debug, Clone)]
pub struct AnnotatedImages {
    pub raw: RgbImage,
    pub boxed: RgbImage,
}

/// Sin cajas, `boxed` es idéntica a `raw`.
pub fn annotate(frame: &RgbImage, detections: &[Detection]) -> AnnotatedImages {
    let mut boxed = frame.clone();
    draw_boxes(&mut boxed, detections.iter().map(|d| (d.bounding_box(), d.label.as_str())));
    AnnotatedImages { raw: frame.clone(), boxed }
}

/// Dibuja rectángulos huecos de `BOX_WIDTH` px con su etiqueta encima (dentro de la caja
/// si no cabe arriba). Las cajas fuera de la imagen se recortan y las degeneradas
/// (ancho o alto nulo, NaN) se ignoran. Una etiqueta vacía no se dibuja.
pub fn draw_boxes<'a>(img: &mut RgbImage, boxes: impl IntoIterator<Item = ([f32; 4], &'a str)>) {
    let (w, h) = (img.width() as f32, img.height() as f32);
    for ([x1, y1, x2, y2], label) in boxes {
        if [x1, y1, x2, y2].iter().any(|v| !v.is_finite()) {
            continue;
        }
        let (x1, x2) = (x1.min(x2).clamp(0.0, w), x1.max(x2).clamp(0.0, w));
        let (y1, y2) = (y1.min(y2).clamp(0.0, h), y1.max(y2).clamp(0.0, h));
        if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
            continue;
        }

        for inset in 0..BOX_WIDTH {
            let inset = inset as f32;
            let bw = (x2 - x1 - 2.0 * inset) as i64;
            let bh = (y2 - y1 - 2.0 * inset) as i64;
            if bw < 1 || bh < 1 {
                break;
            }
            let rect = Rect::at((x1 + inset) as i32, (y1 + inset) as i32).of_size(bw as u32, bh as u32);
            draw_hollow_rect_mut(img, rect, BOX_COLOR);
        }

        if !label.trim().is_empty() {
            draw_label(img, x1 as i32, y1 as i32, label.trim());
        }
    }
}

fn draw_label(img: &mut RgbImage, x: i32, box_top: i32, text: &str) {
    let Some(font) = label_font() else {
        return;
    };
    let scale = PxScale::from(LABEL_PX);
    let (text_w, text_h) = text_size(scale, font, text);
    let tag_w = text_w + 2 * LABEL_PAD;
    let tag_h = text_h.max(LABEL_PX as u32) + 2 * LABEL_PAD;

    let y = if box_top >= tag_h as i32 { box_top - tag_h as i32 } else { box_top };
    draw_filled_rect_mut(img, Rect::at(x, y).of_size(tag_w, tag_h), BOX_COLOR);
    draw_text_mut(img, LABEL_COLOR, x + LABEL_PAD as i32, y + LABEL_PAD as i32, scale, font, text);
}

pub fn encode_jpeg(img: &RgbImage) -> ImageResult<Vec<u8>> {
    let mut jpeg = Vec::new();
    let mut enc = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    enc.encode(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)?;
    Ok(jpeg)
}
