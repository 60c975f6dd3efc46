pub mod detection;
pub mod errors;
pub mod settings;
pub mod status;
pub mod stream;
