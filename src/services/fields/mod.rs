//! Per-field extraction strategies.
//!
//! Every strategy is a stateless function over the span index. Strategies never fail:
//! a field that is not on the label simply yields no candidates.

pub mod anchors;
mod codes;
mod dates;
mod declarations;
mod identity;
mod quantities;

use crate::config::LabelConfig;
use crate::error::Diagnostic;
use crate::services::nrv;
use crate::services::nutrition;
use crate::services::span_index::SpanIndex;
use crate::types::{FieldCandidate, FieldKind, FieldValue, Method};
use anchors::{captures, mean_confidence};
use tracing::debug;

pub type Strategy = fn(&SpanIndex, &LabelConfig) -> Vec<FieldCandidate>;

/// Text-level strategies. The nutrition table has its own parser, see [`extract_all`].
pub const STRATEGIES: &[(FieldKind, Strategy)] = &[
    (FieldKind::Name, identity::name),
    (FieldKind::Ingredients, identity::ingredients),
    (FieldKind::NetContent, quantities::net_content),
    (FieldKind::Producer, identity::producer),
    (FieldKind::DateMarks, dates::date_marks),
    (FieldKind::StorageConditions, declarations::storage_conditions),
    (FieldKind::LicenseNumber, codes::license_number),
    (FieldKind::StandardCode, codes::standard_code),
    (FieldKind::QualityGrade, codes::quality_grade),
    (FieldKind::Allergens, declarations::allergens),
    (FieldKind::Warnings, declarations::warnings),
    (FieldKind::Irradiation, declarations::irradiation),
    (FieldKind::Specification, quantities::specification),
    (FieldKind::Address, identity::address),
    (FieldKind::ContactInfo, identity::contact_info),
    (FieldKind::CommodityBarcode, codes::commodity_barcode),
];

/// Candidates for every field plus the diagnostics raised while reading the table.
#[derive(Debug, Default)]
pub struct Extraction {
    pub candidates: Vec<FieldCandidate>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn extract_all(index: &SpanIndex, config: &LabelConfig) -> Extraction {
    let mut out = Extraction::default();
    for (field, strategy) in STRATEGIES {
        let found = strategy(index, config);
        debug!("{}: {} candidate(s)", field.as_str(), found.len());
        out.candidates.extend(found);
    }

    let parsed = nutrition::parse_table(index, config);
    out.diagnostics.extend(parsed.diagnostics);
    let mut table = parsed.table;
    if !table.is_empty() {
        let (results, mismatches) = nrv::compute(&table, config);
        table.nrv = results;
        out.diagnostics.extend(mismatches);
        out.candidates.push(FieldCandidate::new(
            FieldKind::Nutrition,
            FieldValue::Nutrition(table),
            parsed.positions,
            parsed.confidence,
            parsed.method,
        ));
    }
    out
}

/// Plain text candidates from every capture of `field`. Unlabelled hits score lower.
pub(crate) fn text_candidates(index: &SpanIndex, config: &LabelConfig, field: FieldKind) -> Vec<FieldCandidate> {
    captures(index, config, field)
        .into_iter()
        .filter_map(|capture| {
            let value = capture.value();
            if value.is_empty() {
                return None;
            }
            let factor = if capture.labelled { 1.0 } else { UNLABELLED_FACTOR };
            Some(FieldCandidate::new(
                field,
                FieldValue::Text(value),
                capture.positions.clone(),
                mean_confidence(index, &capture.positions) * factor,
                Method::Anchored,
            ))
        })
        .collect()
}

pub(crate) const UNLABELLED_FACTOR: f64 = 0.9;

/// Pattern-driven field: captured values are searched first, then every span outside a
/// capture. `find` gets the text and whether it came from a capture, and returns the value
/// with an extra confidence factor.
pub(crate) fn anchored_then_pattern<F>(
    index: &SpanIndex,
    config: &LabelConfig,
    field: FieldKind,
    unanchored_factor: f64,
    find: F,
) -> Vec<FieldCandidate>
where
    F: Fn(&str, bool) -> Option<(FieldValue, f64)>,
{
    let mut out = Vec::new();
    let mut covered = Vec::new();
    for capture in captures(index, config, field) {
        covered.extend(capture.positions.iter().copied());
        let Some((value, factor)) = find(&capture.value(), true) else {
            continue;
        };
        out.push(FieldCandidate::new(
            field,
            value,
            capture.positions.clone(),
            mean_confidence(index, &capture.positions) * factor,
            Method::AnchoredPattern,
        ));
    }
    for (pos, span) in index.iter() {
        if covered.contains(&pos) {
            continue;
        }
        if let Some((value, factor)) = find(&span.text, false) {
            out.push(FieldCandidate::new(
                field,
                value,
                vec![pos],
                span.confidence * unanchored_factor * factor,
                Method::Pattern,
            ));
        }
    }
    out
}

/// True when the characters around `start..end` are not ASCII digits.
pub(crate) fn digit_isolated(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.map_or(false, |c| c.is_ascii_digit()) && !after.map_or(false, |c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextSpan;

    #[test]
    fn every_text_field_has_one_strategy() {
        for field in FieldKind::all().filter(|f| *f != FieldKind::Nutrition) {
            assert_eq!(STRATEGIES.iter().filter(|(f, _)| *f == field).count(), 1, "{:?}", field);
        }
    }

    #[test]
    fn strategies_tolerate_empty_index() {
        let config = LabelConfig::builtin().unwrap();
        let index = SpanIndex::build(Vec::new(), 0.5);
        let extraction = extract_all(&index, &config);
        assert!(extraction.candidates.is_empty());
    }

    #[test]
    fn isolation_check() {
        assert!(digit_isolated("电话:4001234567", 7, 17));
        assert!(!digit_isolated("94001234567", 1, 11));
    }

    #[test]
    fn extraction_is_repeatable() {
        let config = LabelConfig::builtin().unwrap();
        let spans = vec![
            TextSpan::from_rect("全麦面包", 0.0, 0.0, 120.0, 30.0, 0.95),
            TextSpan::from_rect("配料:全麦粉,小麦粉,水", 0.0, 50.0, 200.0, 12.0, 0.9),
            TextSpan::from_rect("净含量:400g", 0.0, 70.0, 200.0, 12.0, 0.9),
        ];
        let index = SpanIndex::build(spans, 0.5);
        let a = extract_all(&index, &config);
        let b = extract_all(&index, &config);
        assert_eq!(a.candidates, b.candidates);
    }
}
