//! Net content and package specification.

use super::anchors::{anchors_in, clean_value, mean_confidence};
use super::text_candidates;
use crate::config::LabelConfig;
use crate::services::span_index::SpanIndex;
use crate::types::{FieldCandidate, FieldKind, FieldValue, Method, Quantity, QuantityUnit};
use once_cell::sync::Lazy;
use regex::Regex;

const UNANCHORED_NET_CONTENT: f64 = 0.6;
const SPEC_PATTERN: f64 = 0.8;

static NET_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(千克|公斤|克|毫升|升|kg|KG|Kg|g|G|ml|mL|ML|Ml|l|L|份)").unwrap()
});

static SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\d+(?:\.\d+)?)\s*(千克|公斤|克|毫升|升|kg|g|ml|l)\s*[×xX*]\s*(\d+)\s*(袋|瓶|盒|包|罐|支|片|听|杯|桶|入)?",
    )
    .unwrap()
});

/// Per-100 and per-serving markers that belong to nutrition rows, not to the package.
const TABLE_MARKERS: &[&str] = &["每100", "每份", "per 100", "per serving", "%"];

/// First quantity in `text` whose unit is not glued to further letters ("5g" in "5gb" is not one).
pub fn find_quantity(text: &str) -> Option<Quantity> {
    NET_CONTENT.captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        if text[whole.end()..].chars().next().map_or(false, |c| c.is_ascii_alphabetic()) {
            return None;
        }
        let amount: f64 = caps[1].parse().ok()?;
        let unit_text = caps[2].to_string();
        let unit = QuantityUnit::parse(&unit_text)?;
        Some(Quantity {
            amount,
            unit,
            unit_text,
        })
    })
}

pub fn net_content(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    let mut out = Vec::new();
    for (pos, span) in index.iter() {
        let (anchored, search_from) = match own_anchor(&span.text, config) {
            Some(end) => (true, end),
            None => (label_before(index, pos, config), 0),
        };
        let text = &span.text[search_from..];
        if !anchored && (in_nutrition_context(index, pos, config) || has_table_marker(&span.text)) {
            continue;
        }
        let Some(quantity) = find_quantity(text) else {
            continue;
        };
        let (confidence, method) = if anchored {
            (span.confidence, Method::AnchoredPattern)
        } else {
            (span.confidence * UNANCHORED_NET_CONTENT, Method::Pattern)
        };
        out.push(FieldCandidate::new(
            FieldKind::NetContent,
            FieldValue::Quantity(quantity),
            vec![pos],
            confidence,
            method,
        ));
    }
    out
}

/// End of the net content keyword in this span, if it has one.
fn own_anchor(text: &str, config: &LabelConfig) -> Option<usize> {
    anchors_in(text, config)
        .into_iter()
        .find(|a| a.field == FieldKind::NetContent)
        .map(|a| a.end)
}

/// The span on the left in the same row, or the one just before it in reading order,
/// is a bare net content label.
fn label_before(index: &SpanIndex, pos: usize, config: &LabelConfig) -> bool {
    let previous = index.left_neighbor(pos).or_else(|| pos.checked_sub(1));
    previous.map_or(false, |p| {
        let text = index.text(p);
        own_anchor(text, config).map_or(false, |end| clean_value(&text[end..]).is_empty())
    })
}

fn has_table_marker(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    TABLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// A nutrient name in the span itself, in its row, or within the neighbour radius.
fn in_nutrition_context(index: &SpanIndex, pos: usize, config: &LabelConfig) -> bool {
    let names_nutrient = |p: usize| {
        let lower = index.text(p).to_ascii_lowercase();
        config
            .nutrition
            .nutrients
            .iter()
            .flat_map(|n| n.aliases.iter())
            .any(|alias| lower.contains(alias.as_str()))
    };
    names_nutrient(pos)
        || index.rows()[index.row_of(pos)].iter().any(|&p| p != pos && names_nutrient(p))
        || index
            .within_radius(pos, config.neighbor_radius)
            .into_iter()
            .any(names_nutrient)
}

pub fn specification(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    let mut out = text_candidates(index, config, FieldKind::Specification);
    for (pos, span) in index.iter() {
        let Some(m) = SPEC.find(&span.text) else {
            continue;
        };
        let value: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
        out.push(FieldCandidate::new(
            FieldKind::Specification,
            FieldValue::Text(value.replace(['x', 'X', '*'], "×")),
            vec![pos],
            mean_confidence(index, &[pos]) * SPEC_PATTERN,
            Method::Pattern,
        ));
    }
    out
}
