#[cfg(feature = "rtsp")]
pub mod rtsp;
