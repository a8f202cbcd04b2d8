//! Name, ingredient list, producer, address and contact details.

use super::anchors::{captures, contains_any_keyword, mean_confidence};
use super::{anchored_then_pattern, digit_isolated, text_candidates};
use crate::config::LabelConfig;
use crate::services::span_index::SpanIndex;
use crate::types::{FieldCandidate, FieldKind, FieldValue, Method};
use once_cell::sync::Lazy;
use regex::Regex;

const INGREDIENT_SEPARATORS: &[char] = &[',', '，', ';', '；', '、'];
const UNANCHORED_PRODUCER: f64 = 0.7;
const UNANCHORED_PHONE: f64 = 0.6;

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[48]00[-\s]?\d{3}[-\s]?\d{4})|(?:0\d{2,3}[-\s]?\d{7,8})|(?:1[3-9]\d{9})").unwrap()
});

pub fn name(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    let mut out = text_candidates(index, config, FieldKind::Name);

    let top = index.top_region(config.name_top_fraction);
    let max_height = top
        .iter()
        .map(|&p| index.bbox(p).height())
        .fold(0.0_f64, f64::max);
    if max_height <= 0.0 {
        return out;
    }
    for pos in top {
        let span = index.span(pos);
        if !looks_like_name(&span.text, config) {
            continue;
        }
        let prominence = 0.5 + 0.4 * index.bbox(pos).height() / max_height;
        out.push(FieldCandidate::new(
            FieldKind::Name,
            FieldValue::Text(span.text.clone()),
            vec![pos],
            span.confidence * prominence,
            Method::Heuristic,
        ));
    }
    out
}

fn looks_like_name(text: &str, config: &LabelConfig) -> bool {
    let len = text.chars().count();
    if !(2..=30).contains(&len) || text.contains(':') {
        return false;
    }
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    if digits * 2 >= len {
        return false;
    }
    let lower = text.to_ascii_lowercase();
    if config.producer_markers.iter().any(|m| lower.contains(m.as_str())) {
        return false;
    }
    !contains_any_keyword(text, config)
}

pub fn ingredients(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    captures(index, config, FieldKind::Ingredients)
        .into_iter()
        .filter_map(|capture| {
            let items: Vec<String> = capture
                .fragments()
                .iter()
                .flat_map(|f| split_ingredients(f))
                .collect();
            if items.is_empty() {
                return None;
            }
            Some(FieldCandidate::new(
                FieldKind::Ingredients,
                FieldValue::Text(items.join("、")),
                capture.positions.clone(),
                mean_confidence(index, &capture.positions),
                Method::Anchored,
            ))
        })
        .collect()
}

/// Split an ingredient fragment on list separators outside brackets:
/// "食用植物油(棕榈油,大豆油),水" keeps the bracketed group whole.
pub fn split_ingredients(fragment: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in fragment.chars() {
        match c {
            '(' | '（' | '[' | '【' => depth += 1,
            ')' | '）' | ']' | '】' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && INGREDIENT_SEPARATORS.contains(&c) {
            push_item(&mut items, &current);
            current.clear();
        } else {
            current.push(c);
        }
    }
    push_item(&mut items, &current);
    items
}

fn push_item(items: &mut Vec<String>, raw: &str) {
    let item = raw.trim().trim_end_matches(['。', '.']).trim();
    if !item.is_empty() {
        items.push(item.to_string());
    }
}

pub fn producer(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    let anchored = captures(index, config, FieldKind::Producer);
    let covered: Vec<usize> = anchored.iter().flat_map(|c| c.positions.iter().copied()).collect();
    let mut out = text_candidates(index, config, FieldKind::Producer);

    let address_keywords = config
        .rules(FieldKind::Address)
        .map(|r| r.keywords.as_slice())
        .unwrap_or_default();
    for (pos, span) in index.iter() {
        if covered.contains(&pos) {
            continue;
        }
        let lower = span.text.to_ascii_lowercase();
        if address_keywords.iter().any(|k| lower.contains(k.as_str())) {
            continue;
        }
        let Some(value) = company_name(&span.text, &lower, &config.producer_markers) else {
            continue;
        };
        out.push(FieldCandidate::new(
            FieldKind::Producer,
            FieldValue::Text(value),
            vec![pos],
            span.confidence * UNANCHORED_PRODUCER,
            Method::Heuristic,
        ));
    }
    out
}

/// Company name ending at a legal-form marker, starting after the last colon.
fn company_name(text: &str, lower: &str, markers: &[String]) -> Option<String> {
    let end = markers
        .iter()
        .filter_map(|m| lower.find(m.as_str()).map(|i| i + m.len()))
        .max()?;
    let start = text[..end].rfind(':').map_or(0, |i| i + 1);
    let name = text[start..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

pub fn address(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    text_candidates(index, config, FieldKind::Address)
}

pub fn contact_info(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    anchored_then_pattern(
        index,
        config,
        FieldKind::ContactInfo,
        UNANCHORED_PHONE,
        |text, _| find_phone(text).map(|p| (FieldValue::Text(p), 1.0)),
    )
}

/// First phone number not glued to other digits.
pub fn find_phone(text: &str) -> Option<String> {
    PHONE
        .find_iter(text)
        .find(|m| digit_isolated(text, m.start(), m.end()))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextSpan;

    fn config() -> LabelConfig {
        LabelConfig::builtin().unwrap()
    }

    fn rows(lines: &[(&str, f64)]) -> SpanIndex {
        let spans = lines
            .iter()
            .enumerate()
            .map(|(i, (t, conf))| TextSpan::from_rect(*t, 0.0, i as f64 * 14.0, 200.0, 10.0, *conf))
            .collect();
        SpanIndex::build(spans, 0.5)
    }

    fn texts(candidates: &[FieldCandidate]) -> Vec<String> {
        candidates.iter().map(|c| c.value.display()).collect()
    }

    #[test]
    fn ingredients_joined_with_list_mark() {
        let index = rows(&[("配料", 0.9), ("全麦粉, 小麦粉, 水", 0.9)]);
        let found = ingredients(&index, &config());
        assert_eq!(texts(&found), vec!["全麦粉、小麦粉、水"]);
        assert_eq!(found[0].source_spans, vec![0, 1]);
    }

    #[test]
    fn bracketed_groups_stay_whole() {
        assert_eq!(
            split_ingredients("食用植物油(棕榈油,大豆油),白砂糖;食用盐。"),
            vec!["食用植物油(棕榈油,大豆油)", "白砂糖", "食用盐"]
        );
    }

    #[test]
    fn anchored_producer_beats_marker_fallback() {
        let index = rows(&[("生产商:甲食品有限公司", 0.9), ("乙食品有限公司监制", 0.9)]);
        let found = producer(&index, &config());
        assert_eq!(texts(&found), vec!["甲食品有限公司", "乙食品有限公司"]);
        assert!(found[0].confidence > found[1].confidence);
    }

    #[test]
    fn producer_fallback_skips_addresses() {
        let index = rows(&[("地址:某市某区某某食品有限公司厂区", 0.9)]);
        assert!(producer(&index, &config()).is_empty());
    }

    #[test]
    fn name_prefers_tall_top_spans() {
        let spans = vec![
            TextSpan::from_rect("全麦面包", 0.0, 0.0, 200.0, 40.0, 0.9),
            TextSpan::from_rect("好吃又健康", 0.0, 45.0, 100.0, 10.0, 0.9),
            TextSpan::from_rect("配料:水", 0.0, 300.0, 100.0, 10.0, 0.9),
        ];
        let index = SpanIndex::build(spans, 0.5);
        let found = name(&index, &config());
        assert_eq!(found.len(), 2);
        let best = found
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .unwrap();
        assert_eq!(best.value.display(), "全麦面包");
        assert!((best.confidence - 0.81).abs() < 1e-9);
    }

    #[test]
    fn anchored_name() {
        let index = rows(&[("产品名称:全麦面包", 0.8)]);
        let found = name(&index, &config());
        assert_eq!(found[0].value.display(), "全麦面包");
        assert_eq!(found[0].method, Method::Anchored);
    }

    #[test]
    fn phones_found_with_and_without_label() {
        assert_eq!(find_phone("服务热线:400-123-4567").as_deref(), Some("400-123-4567"));
        assert_eq!(find_phone("SC10644011500123"), None);
        let index = rows(&[("电话:0755-12345678", 0.9), ("13812345678", 0.9)]);
        let found = contact_info(&index, &config());
        assert_eq!(texts(&found), vec!["0755-12345678", "13812345678"]);
        assert_eq!(found[0].method, Method::AnchoredPattern);
        assert!((found[1].confidence - 0.54).abs() < 1e-9);
    }
}
