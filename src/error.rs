use crate::types::{FieldKind, NutrientKind};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to load or validate the keyword / reference tables.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read label tables from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse label tables: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid label tables: {0}")]
    Invalid(String),
}

/// Errors at the edges of the engine: configuration, OCR result adaptation and numeric tokens.
/// Extraction itself never fails; see [`Diagnostic`].
#[derive(Debug, Error)]
pub enum LabelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("malformed OCR span #{index}: {reason}")]
    MalformedSpan { index: usize, reason: String },
    #[error("unrecognized OCR result shape: {0}")]
    UnrecognizedShape(String),
    #[error("malformed numeric token '{0}'")]
    MalformedNumeric(String),
    #[error("invalid OCR JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Partial failures absorbed during a run and kept on the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    NotDetected {
        field: FieldKind,
    },
    LowConfidence {
        field: FieldKind,
        confidence: f64,
        floor: f64,
    },
    MalformedNumeric {
        nutrient: NutrientKind,
        token: String,
    },
    StructuralAmbiguity {
        detail: String,
    },
    CrossFieldMismatch {
        detail: String,
    },
    NrvMismatch {
        nutrient: NutrientKind,
        declared: u32,
        computed: u32,
    },
    MalformedInput {
        detail: String,
    },
}
