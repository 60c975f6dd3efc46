pub mod capture;
pub mod gst;
pub mod http;
pub mod settings;
pub mod storage;
pub mod telegram;

#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(feature = "v4l2")]
pub mod v4l2;
