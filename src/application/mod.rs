pub mod annotator;
pub mod dto;
pub mod engine;
pub mod flusher;
pub mod frame_source;
pub mod ports;
pub mod runner;
pub mod scheduler;
pub mod services;
pub mod worker;
