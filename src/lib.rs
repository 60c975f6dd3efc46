//! Servicio de detección de objetos sobre cámaras IP / V4L2.
//!
//! Capas (arquitectura hexagonal):
//! - `domain`: tipos puros (ajustes, detecciones, errores).
//! - `application`: puertos, motor del pipeline y servicios.
//! - `adapters`: captura (V4L2, GStreamer, patrón de prueba), ONNX, sled, ficheros JSON, HTTP y bot de Telegram.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
