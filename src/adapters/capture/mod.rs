pub mod test_pattern;

use std::time::Duration;
use tracing::info;

use crate::application::ports::{StreamOpener, VideoStream};
use crate::domain::errors::{DomainResult, PipelineError};
use crate::domain::settings::{configured_stream_address, SettingsMap};
use self::test_pattern::TestPatternStream;

/// Backend elegido a partir de la dirección del stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamScheme {
    /// `/dev/videoN` o `v4l2:///dev/videoN`
    Device(String),
    /// `rtsp://`, `rtsps://`, `http://`, `https://`
    Network(String),
    /// `test://pattern`: imagen sintética, sin hardware.
    TestPattern,
}

impl StreamScheme {
    pub fn parse(address: &str) -> Option<Self> {
        let address = address.trim();
        if let Some(path) = address.strip_prefix("v4l2://") {
            return (!path.is_empty()).then(|| Self::Device(path.to_string()));
        }
        if address.starts_with("/dev/video") {
            return Some(Self::Device(address.to_string()));
        }
        if address.starts_with("test://") {
            return Some(Self::TestPattern);
        }
        let lower = address.to_ascii_lowercase();
        ["rtsp://", "rtsps://", "http://", "https://"]
            .iter()
            .any(|p| lower.starts_with(p))
            .then(|| Self::Network(address.to_string()))
    }
}

impl StreamScheme {
    /// `true` si este binario trae el backend que atiende el esquema.
    pub fn is_compiled_in(&self) -> bool {
        match self {
            Self::TestPattern => true,
            Self::Device(_) => cfg!(feature = "v4l2"),
            Self::Network(_) => cfg!(feature = "rtsp"),
        }
    }

    fn feature(&self) -> &'static str {
        match self {
            Self::TestPattern => "-",
            Self::Device(_) => "v4l2",
            Self::Network(_) => "rtsp",
        }
    }
}

/// Abre el backend que corresponda según el esquema de la dirección.
#[derive(Debug, Default, Clone)]
pub struct SchemeStreamOpener;

impl SchemeStreamOpener {
    pub fn new() -> Self {
        Self
    }

    /// Comprueba, sin abrir nada, que la dirección tiene un backend compilado.
    pub fn check(&self, address: &str) -> DomainResult<StreamScheme> {
        let scheme = StreamScheme::parse(address)
            .ok_or_else(|| PipelineError::connect(address, "esquema de dirección no soportado"))?;
        if !scheme.is_compiled_in() {
            let feature = scheme.feature();
            return Err(PipelineError::connect(
                address,
                format!("compilado sin soporte {} (recompilar con `--features {feature}`)", feature.to_uppercase()),
            ));
        }
        Ok(scheme)
    }

    /// Falla si los ajustes de cámara apuntan a un backend que este binario no trae.
    /// Sin dirección configurada no hay nada que comprobar.
    pub fn check_settings(&self, camera: &SettingsMap) -> DomainResult<()> {
        match configured_stream_address(camera) {
            Some(address) => self.check(&address).map(|_| ()),
            None => Ok(()),
        }
    }
}

impl StreamOpener for SchemeStreamOpener {
    fn open(&self, address: &str, fps: u32) -> DomainResult<Box<dyn VideoStream>> {
        let scheme = self.check(address)?;
        info!(%address, ?scheme, fps, "Abriendo stream");

        match scheme {
            StreamScheme::TestPattern => Ok(Box::new(TestPatternStream::new(640, 480, fps))),
            #[cfg(feature = "v4l2")]
            StreamScheme::Device(path) => Ok(Box::new(crate::adapters::v4l2::capture::V4l2Capture::open(&path, fps)?)),
            #[cfg(feature = "rtsp")]
            StreamScheme::Network(url) => Ok(Box::new(crate::adapters::gst::rtsp::GstNetworkStream::open(&url, fps)?)),
            #[allow(unreachable_patterns)]
            _ => Err(PipelineError::connect(address, "backend no disponible")),
        }
    }

    fn max_block(&self) -> Duration {
        // Un frame sintético a 1 fps.
        #[allow(unused_mut)]
        let mut bound = Duration::from_secs(1);
        #[cfg(feature = "v4l2")]
        {
            bound = bound.max(crate::adapters::v4l2::capture::READ_TIMEOUT);
        }
        #[cfg(feature = "rtsp")]
        {
            bound = bound.max(crate::adapters::gst::rtsp::MAX_BLOCK);
        }
        bound
    }
}
