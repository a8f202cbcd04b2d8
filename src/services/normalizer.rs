//! Text cleanup applied to every span before indexing.

use crate::config::{CharMap, LabelConfig};
use crate::types::TextSpan;

/// Normalize one span. Returns `None` when nothing but whitespace is left.
pub fn normalize_span(span: &TextSpan, config: &LabelConfig) -> Option<TextSpan> {
    let text = normalize_text(&span.raw_text, config);
    if text.is_empty() {
        return None;
    }
    Some(span.with_text(text))
}

/// Normalize every span, dropping the ones that end up empty. Input order is kept.
pub fn normalize_all(spans: &[TextSpan], config: &LabelConfig) -> Vec<TextSpan> {
    spans.iter().filter_map(|s| normalize_span(s, config)).collect()
}

pub fn normalize_text(raw: &str, config: &LabelConfig) -> String {
    let mut text = collapse_whitespace(&to_half_width(raw));
    for sub in &config.text_substitutions {
        if !sub.from.is_empty() && text.contains(&sub.from) {
            text = text.replace(&sub.from, &sub.to);
        }
    }
    let text = fix_digit_runs(&text, &config.numeric_confusions.run);
    fix_between_digits(&text, &config.numeric_confusions.between_digits)
}

/// Full-width ASCII (U+FF01..U+FF5E) and the ideographic space to their half-width forms.
pub fn to_half_width(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace look-alike letters inside runs of digits, dots and look-alikes that hold at
/// least one real digit. A run glued to a preceding ASCII letter keeps its leading
/// look-alikes ("Vol", "Il"); look-alikes of `1` after the last digit are kept too, so
/// litre units survive ("1.5l").
pub fn fix_digit_runs(s: &str, run: &CharMap) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = chars.clone();
    let is_run_char = |c: char| c.is_ascii_digit() || c == '.' || run.contains(c);
    let mut i = 0;
    while i < chars.len() {
        if !is_run_char(chars[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && is_run_char(chars[i]) {
            i += 1;
        }
        let end = i;
        let Some(first_digit) = (start..end).find(|&k| chars[k].is_ascii_digit()) else {
            continue;
        };
        let last_digit = (start..end).rev().find(|&k| chars[k].is_ascii_digit()).unwrap_or(first_digit);
        let glued = start > 0 && chars[start - 1].is_ascii_alphabetic();
        let from = if glued { first_digit } else { start };
        for k in from..end {
            match run.get(chars[k]) {
                Some('1') if k > last_digit => {}
                Some(fixed) => out[k] = fixed,
                None => {}
            }
        }
    }
    out.into_iter().collect()
}

/// Replace look-alikes sitting between two digits ("1S0" → "150").
pub fn fix_between_digits(s: &str, between: &CharMap) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = chars.clone();
    for k in 1..chars.len().saturating_sub(1) {
        if chars[k - 1].is_ascii_digit() && chars[k + 1].is_ascii_digit() {
            if let Some(fixed) = between.get(chars[k]) {
                out[k] = fixed;
            }
        }
    }
    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LabelConfig {
        LabelConfig::builtin().unwrap()
    }

    #[test]
    fn full_width_converted() {
        assert_eq!(to_half_width("ＳＣ１２３："), "SC123:");
        assert_eq!(to_half_width("配料\u{3000}水"), "配料 水");
    }

    #[test]
    fn whitespace_collapsed() {
        assert_eq!(normalize_text("  配料 \t 水  ", &config()), "配料 水");
    }

    #[test]
    fn digit_look_alikes_in_numeric_run() {
        let c = config();
        assert_eq!(normalize_text("4OO克", &c), "400克");
        assert_eq!(normalize_text("净含量:l5Og", &c), "净含量:150g");
        assert_eq!(normalize_text("4OOg", &c), "400g");
    }

    #[test]
    fn litre_units_kept() {
        let c = config();
        assert_eq!(normalize_text("净含量:1.5l", &c), "净含量:1.5l");
        assert_eq!(normalize_text("1l", &c), "1l");
        assert_eq!(normalize_text("净含量:500ml", &c), "净含量:500ml");
        assert_eq!(normalize_text("1l5", &c), "115");
    }

    #[test]
    fn words_without_digits_untouched() {
        let c = config();
        assert_eq!(normalize_text("Oil", &c), "Oil");
        assert_eq!(normalize_text("Vol 2", &c), "Vol 2");
        assert_eq!(normalize_text("Vitamin D3", &c), "Vitamin D3");
    }

    #[test]
    fn between_digits_only() {
        let c = config();
        assert_eq!(normalize_text("1S0mg", &c), "150mg");
        assert_eq!(normalize_text("SB/T 10", &c), "SB/T 10");
    }

    #[test]
    fn substitution_table_applied() {
        assert_eq!(normalize_text("配科:水", &config()), "配料:水");
    }

    #[test]
    fn empty_spans_dropped() {
        let c = config();
        let spans = vec![
            TextSpan::from_rect("  ", 0.0, 0.0, 10.0, 10.0, 0.9),
            TextSpan::from_rect("水", 0.0, 20.0, 10.0, 10.0, 0.9),
        ];
        let out = normalize_all(&spans, &c);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "水");
        assert_eq!(out[0].raw_text, "水");
    }
}
