//! Food label field extraction.
//!
//! Turns the OCR spans of a prepackaged food label into a typed record of the GB 7718
//! label elements, with the nutrition table parsed and NRV percentages computed.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod ocr;
pub mod services;
pub mod types;

pub use config::LabelConfig;
pub use engine::LabelEngine;
pub use error::{ConfigError, Diagnostic, LabelError};
pub use models::{FieldResult, FieldStatus, LabelRecord};
pub use types::{FieldKind, NutrientKind, OcrLine, Point, TextSpan};
