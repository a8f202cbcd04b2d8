//! Extraction entry point.

use crate::config::LabelConfig;
use crate::error::{ConfigError, LabelError};
use crate::models::LabelRecord;
use crate::ocr;
use crate::services::span_index::SpanIndex;
use crate::services::{assembler, fields, normalizer};
use crate::types::{OcrLine, TextSpan};
use std::sync::Arc;
use tracing::{debug, warn};

/// Holds the immutable label tables; every run is independent, so one engine can be
/// shared across threads.
#[derive(Debug, Clone)]
pub struct LabelEngine {
    config: Arc<LabelConfig>,
}

impl LabelEngine {
    pub fn new(config: LabelConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn from_shared(config: Arc<LabelConfig>) -> Self {
        Self { config }
    }

    /// Engine over the embedded tables.
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Ok(Self::new(LabelConfig::builtin()?))
    }

    /// Engine over the tables named by `FOOD_LABEL_TABLES`, or the embedded ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(LabelConfig::from_env()?))
    }

    pub fn config(&self) -> &LabelConfig {
        &self.config
    }

    /// Run the full pipeline over one label's spans. Never fails: an empty input, or one
    /// holding a span that cannot be placed, gives a record with every field absent.
    pub fn extract(&self, spans: &[TextSpan]) -> LabelRecord {
        let config = self.config.as_ref();
        if spans.is_empty() {
            return LabelRecord::empty();
        }
        if let Err(e) = ocr::validate_spans(spans) {
            warn!("rejecting OCR input: {}", e);
            return LabelRecord::rejected(e.to_string());
        }

        let confident = ocr::filter_confident(spans.to_vec(), config.min_span_confidence);
        let normalized = normalizer::normalize_all(&confident, config);
        let index = SpanIndex::build(normalized, config.row_overlap_ratio);
        debug!("{} span(s) in {} row(s)", index.len(), index.rows().len());
        if index.is_empty() {
            return LabelRecord::empty();
        }

        let extraction = fields::extract_all(&index, config);
        let record = assembler::assemble(extraction.candidates, extraction.diagnostics, config);
        debug!("aggregate confidence {:.3}", record.confidence);
        record
    }

    /// Adapt an OCR JSON result and extract from it. Unreadable JSON or an unknown result
    /// shape is an error; a malformed span inside a known shape gives an empty record.
    pub fn extract_json(&self, json: &str) -> Result<LabelRecord, LabelError> {
        match ocr::spans_from_json_str(json) {
            Ok(spans) => Ok(self.extract(&spans)),
            Err(e @ LabelError::MalformedSpan { .. }) => {
                warn!("rejecting OCR input: {}", e);
                Ok(LabelRecord::rejected(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Extract from engines that report text lines without geometry.
    pub fn extract_lines(&self, lines: &[OcrLine]) -> LabelRecord {
        self.extract(&ocr::spans_from_lines(lines))
    }
}
