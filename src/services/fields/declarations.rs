//! Storage conditions, allergen declaration, warnings and the irradiation mark.

use super::anchors::{captures, clean_value, mean_confidence};
use super::{text_candidates, UNLABELLED_FACTOR};
use crate::config::LabelConfig;
use crate::services::span_index::SpanIndex;
use crate::types::{FieldCandidate, FieldKind, FieldValue, Method};

/// Allergens read off the ingredient list instead of a declaration.
const ALLERGENS_FROM_INGREDIENTS: f64 = 0.6;

/// Negations in front of an irradiation keyword ("未经辐照").
const NEGATIONS: &[&str] = &["未经", "未", "非", "不含", "无"];

pub fn storage_conditions(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    text_candidates(index, config, FieldKind::StorageConditions)
}

pub fn warnings(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    text_candidates(index, config, FieldKind::Warnings)
}

pub fn allergens(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    let mut out = text_candidates(index, config, FieldKind::Allergens);

    for capture in captures(index, config, FieldKind::Ingredients) {
        let value = capture.value();
        let mut found: Vec<(usize, &str)> = config
            .allergens
            .terms
            .iter()
            .filter_map(|term| value.find(term.as_str()).map(|i| (i, term.as_str())))
            .collect();
        if found.is_empty() {
            continue;
        }
        found.sort();
        let mut terms: Vec<&str> = Vec::new();
        for (_, term) in found {
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        out.push(FieldCandidate::new(
            FieldKind::Allergens,
            FieldValue::Text(terms.join("、")),
            capture.positions.clone(),
            mean_confidence(index, &capture.positions) * ALLERGENS_FROM_INGREDIENTS,
            Method::Derived,
        ));
    }
    out
}

/// The declaration is the whole span that carries the keyword, unless it is negated.
pub fn irradiation(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    captures(index, config, FieldKind::Irradiation)
        .into_iter()
        .filter_map(|capture| {
            let pos = capture.anchor_pos();
            let text = index.text(pos);
            let lower = text.to_ascii_lowercase();
            let at = lower.find(capture.keyword.as_str())?;
            if NEGATIONS.iter().any(|n| lower[..at].ends_with(n)) || lower[..at].ends_with("not ") {
                return None;
            }
            let value = clean_value(text);
            let factor = if capture.labelled { 1.0 } else { UNLABELLED_FACTOR };
            Some(FieldCandidate::new(
                FieldKind::Irradiation,
                FieldValue::Text(value),
                vec![pos],
                index.span(pos).confidence * factor,
                Method::Anchored,
            ))
        })
        .collect()
}
