//! ABOUTME: OCR engine drivers for ocrflow
//! ABOUTME: Six drivers behind the OcrEngine contract, plus registry, retry, and preprocessing

pub mod cost;
pub mod drivers;
pub mod preprocess;
pub mod rate_limit;
pub mod registry;
pub mod retry;

pub use registry::{EngineProvider, EngineRegistry};
