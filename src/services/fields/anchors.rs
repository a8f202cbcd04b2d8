//! Keyword anchors and value capture shared by the keyword-driven strategies.

use crate::config::LabelConfig;
use crate::services::span_index::SpanIndex;
use crate::types::FieldKind;

/// Decorations allowed in front of a leading label ("【配料】", "* 净含量").
const LEADING_DECORATIONS: &[char] = &['【', '[', '(', '（', '<', '《', '*', '·', '●', '■', '◆', '★', '-'];
/// Closers allowed between a label and its colon or value.
const CLOSERS: &[char] = &['】', ']', ')', '）', '>', '》'];
const SENTENCE_END: &[char] = &['。', ';', '；', '!', '！'];
const CLAUSE_START: &[char] = &['。', ';', '；', '!', '！', ':', '、', ',', '，'];
const TRAILING_PUNCT: &[char] = &[';', '；', ',', '，', '、', '。', '.'];
const LIST_SEPARATORS: &[char] = &[',', '，', ';', '；', '、'];

/// A keyword hit inside one span's normalized text (byte offsets).
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub field: FieldKind,
    pub start: usize,
    pub end: usize,
    /// The keyword is used as a label: it opens the span or is followed by ':'.
    pub labelled: bool,
}

/// All anchors in `text`, non-overlapping, in text order. When hits overlap the one that
/// starts first wins, then the longer keyword, then the field declared first.
pub fn anchors_in(text: &str, config: &LabelConfig) -> Vec<Anchor> {
    let lower = text.to_ascii_lowercase();
    let mut hits: Vec<Anchor> = Vec::new();
    for field in FieldKind::all() {
        let Some(rules) = config.rules(field) else {
            continue;
        };
        for keyword in &rules.keywords {
            for (start, _) in lower.match_indices(keyword.as_str()) {
                let end = start + keyword.len();
                let labelled = is_leading(text, start) || is_followed_by_colon(text, end);
                if labelled || rules.anywhere {
                    hits.push(Anchor {
                        field,
                        start,
                        end,
                        labelled,
                    });
                }
            }
        }
    }
    hits.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then((b.end - b.start).cmp(&(a.end - a.start)))
            .then(a.field.cmp(&b.field))
    });
    let mut accepted: Vec<Anchor> = Vec::new();
    for hit in hits {
        if accepted.last().map_or(true, |last| hit.start >= last.end) {
            accepted.push(hit);
        }
    }
    accepted
}

fn is_leading(text: &str, start: usize) -> bool {
    text[..start]
        .trim_matches(|c: char| c.is_whitespace() || LEADING_DECORATIONS.contains(&c))
        .is_empty()
}

fn is_followed_by_colon(text: &str, end: usize) -> bool {
    text[end..]
        .trim_start_matches(|c: char| c.is_whitespace() || CLOSERS.contains(&c))
        .starts_with(':')
}

/// True when the span opens a new labelled element or a nutrient row. Keywords met
/// mid-text ("植物油(含有大豆)") belong to the value being read.
pub fn stops_capture(text: &str, config: &LabelConfig) -> bool {
    anchors_in(text, config).iter().any(|a| a.labelled) || starts_nutrient_row(text, config)
}

/// "能量 1450kJ" style rows, which belong to the nutrition table.
fn starts_nutrient_row(text: &str, config: &LabelConfig) -> bool {
    let lower = text.to_ascii_lowercase();
    config.nutrition.nutrients.iter().any(|n| {
        n.aliases.iter().any(|alias| {
            lower.starts_with(alias.as_str())
                && lower[alias.len()..].chars().any(|c| c.is_ascii_digit())
        })
    })
}

/// True when any field keyword occurs anywhere in the text.
pub fn contains_any_keyword(text: &str, config: &LabelConfig) -> bool {
    let lower = text.to_ascii_lowercase();
    config
        .fields
        .values()
        .flat_map(|r| r.keywords.iter())
        .any(|k| lower.contains(k.as_str()))
}

/// One value read from an anchor.
#[derive(Debug, Clone)]
pub struct Capture {
    pub field: FieldKind,
    /// Matched keyword, ASCII lower-cased.
    pub keyword: String,
    /// Anchor span first, then continuation spans.
    pub positions: Vec<usize>,
    /// Text after the keyword in the anchor span, or the surrounding clause for
    /// unlabelled hits.
    pub inline: String,
    pub continuation: Vec<String>,
    /// List separator that ended the text before each continuation fragment.
    pub separators: Vec<Option<char>>,
    pub labelled: bool,
}

impl Capture {
    pub fn anchor_pos(&self) -> usize {
        self.positions[0]
    }

    /// Inline text and continuation fragments in reading order.
    pub fn fragments(&self) -> Vec<String> {
        std::iter::once(self.inline.clone())
            .chain(self.continuation.iter().cloned())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Fragments joined in reading order, keeping the list separator printed at a line end.
    pub fn value(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.inline.is_empty() {
            parts.push(self.inline.clone());
        }
        for (text, sep) in self.continuation.iter().zip(&self.separators) {
            if let (Some(last), Some(sep)) = (parts.last_mut(), sep) {
                last.push(*sep);
            }
            parts.push(text.clone());
        }
        join_fragments(&parts)
    }

    pub fn is_empty(&self) -> bool {
        self.inline.is_empty() && self.continuation.is_empty()
    }
}

/// Every capture of `field` in reading order.
pub fn captures(index: &SpanIndex, config: &LabelConfig, field: FieldKind) -> Vec<Capture> {
    let Some(rules) = config.rules(field) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (pos, span) in index.iter() {
        let text = span.text.as_str();
        let anchors = anchors_in(text, config);
        for (i, anchor) in anchors.iter().enumerate() {
            if anchor.field != field {
                continue;
            }
            let region_end = anchors[i + 1..]
                .iter()
                .find(|a| a.labelled)
                .map_or(text.len(), |a| a.start);

            let keyword = text[anchor.start..anchor.end].to_ascii_lowercase();
            if !anchor.labelled {
                let inside_own_label = anchors[..i]
                    .iter()
                    .rev()
                    .find(|a| a.labelled)
                    .map_or(false, |a| a.field == field);
                if inside_own_label {
                    continue;
                }
                out.push(Capture {
                    field,
                    keyword,
                    positions: vec![pos],
                    inline: clause_around(text, anchor.start, anchor.end, region_end),
                    continuation: Vec::new(),
                    separators: Vec::new(),
                    labelled: false,
                });
                continue;
            }

            let inline = clean_value(&text[anchor.end..region_end]);
            let next_labelled = anchors[i + 1..].iter().find(|a| a.labelled);
            let bare_label = text[anchor.end..region_end].trim_matches(|c: char| {
                c.is_whitespace() || c == ':' || CLOSERS.contains(&c) || LEADING_DECORATIONS.contains(&c)
            });
            if bare_label.is_empty() && next_labelled.map_or(false, |a| a.field == field) {
                // "配料表(Ingredients):" reads as one label
                continue;
            }

            let mut capture = Capture {
                field,
                keyword,
                positions: vec![pos],
                inline,
                continuation: Vec::new(),
                separators: Vec::new(),
                labelled: true,
            };
            let last_in_span = next_labelled.is_none();
            if last_in_span && (rules.block || capture.inline.is_empty()) {
                let trailing = trailing_separator(&text[anchor.end..region_end]);
                continue_capture(index, config, &mut capture, rules.max_spans, trailing);
            }
            out.push(capture);
        }
    }
    out
}

fn continue_capture(
    index: &SpanIndex,
    config: &LabelConfig,
    capture: &mut Capture,
    budget: usize,
    mut trailing: Option<char>,
) {
    let mut last = capture.anchor_pos();
    for next in index.following(capture.anchor_pos()) {
        if capture.continuation.len() >= budget {
            break;
        }
        let text = index.text(next);
        if stops_capture(text, config) || index.gap_in_heights(last, next) > config.max_continuation_gap {
            break;
        }
        let value = clean_value(text);
        if !value.is_empty() {
            capture.continuation.push(value);
            capture.separators.push(trailing);
            capture.positions.push(next);
            trailing = trailing_separator(text);
        }
        last = next;
    }
}

/// Strip label leftovers at the front and list punctuation at the end.
pub fn clean_value(s: &str) -> String {
    s.trim_start_matches(|c: char| c.is_whitespace() || c == ':' || CLOSERS.contains(&c))
        .trim_end_matches(|c: char| c.is_whitespace() || TRAILING_PUNCT.contains(&c))
        .to_string()
}

fn trailing_separator(s: &str) -> Option<char> {
    s.trim_end().chars().last().filter(|c| LIST_SEPARATORS.contains(c))
}

/// Clause holding an unlabelled keyword: back to the previous clause break, forward to
/// the end of the sentence (or `limit`).
fn clause_around(text: &str, start: usize, end: usize, limit: usize) -> String {
    let from = text[..start]
        .rfind(|c: char| CLAUSE_START.contains(&c))
        .map_or(0, |i| i + text[i..].chars().next().map_or(0, char::len_utf8));
    let to = text[end..limit]
        .find(|c: char| SENTENCE_END.contains(&c))
        .map_or(limit, |i| end + i);
    clean_value(&text[from..to])
}

pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x3000..=0x303F | 0xFF00..=0xFFEF)
}

/// Join fragments: nothing between two CJK characters or after a separator followed by
/// CJK, a single space otherwise.
pub fn join_fragments(parts: &[String]) -> String {
    let mut out = String::new();
    for part in parts.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        let glue = match (out.chars().last(), part.chars().next()) {
            (Some(a), Some(b)) => !((is_cjk(a) || LIST_SEPARATORS.contains(&a)) && is_cjk(b)),
            _ => false,
        };
        if glue {
            out.push(' ');
        }
        out.push_str(part);
    }
    out
}

/// Mean OCR confidence of the spans at `positions`.
pub fn mean_confidence(index: &SpanIndex, positions: &[usize]) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }
    positions.iter().map(|&p| index.span(p).confidence).sum::<f64>() / positions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextSpan;

    fn config() -> LabelConfig {
        LabelConfig::builtin().unwrap()
    }

    fn index(lines: &[&str]) -> SpanIndex {
        let spans = lines
            .iter()
            .enumerate()
            .map(|(i, t)| TextSpan::from_rect(*t, 0.0, i as f64 * 14.0, 200.0, 10.0, 0.9))
            .collect();
        SpanIndex::build(spans, 0.5)
    }

    #[test]
    fn leading_label_is_anchor() {
        let c = config();
        let anchors = anchors_in("配料表 全麦粉", &c);
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].field, FieldKind::Ingredients);
        assert_eq!(anchors[0].end, "配料表".len());
        assert!(anchors[0].labelled);
    }

    #[test]
    fn keyword_inside_text_needs_colon() {
        let c = config();
        assert!(anchors_in("本品配料丰富", &c).is_empty());
        let anchors = anchors_in("全麦面包 配料:水", &c);
        assert_eq!(anchors.len(), 1);
        assert!(anchors[0].labelled);
    }

    #[test]
    fn anywhere_fields_match_inside_text() {
        let c = config();
        let anchors = anchors_in("请置于阴凉干燥处", &c);
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].field, FieldKind::StorageConditions);
        assert!(!anchors[0].labelled);
    }

    #[test]
    fn longest_keyword_wins() {
        let c = config();
        let anchors = anchors_in("受委托生产企业:某某食品有限公司", &c);
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].field, FieldKind::Producer);
        assert_eq!(anchors[0].end, "受委托生产企业".len());
    }

    #[test]
    fn inline_value_cut_at_next_label() {
        let c = config();
        let idx = index(&["净含量:500g 规格:500g×2袋"]);
        let caps = captures(&idx, &c, FieldKind::NetContent);
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].inline, "500g");
    }

    #[test]
    fn block_field_continues_until_next_anchor() {
        let c = config();
        let idx = index(&["配料:全麦粉,", "小麦粉,水", "净含量:400g"]);
        let caps = captures(&idx, &c, FieldKind::Ingredients);
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].positions, vec![0, 1]);
        assert_eq!(caps[0].value(), "全麦粉,小麦粉,水");
        assert_eq!(caps[0].fragments(), vec!["全麦粉".to_string(), "小麦粉,水".to_string()]);
    }

    #[test]
    fn plain_field_takes_next_span_only_when_empty() {
        let c = config();
        let idx = index(&["生产商:", "某某食品有限公司", "地址:某地"]);
        let caps = captures(&idx, &c, FieldKind::Producer);
        assert_eq!(caps[0].value(), "某某食品有限公司");

        let idx = index(&["生产商:甲公司", "乙公司"]);
        let caps = captures(&idx, &c, FieldKind::Producer);
        assert_eq!(caps[0].positions, vec![0]);
    }

    #[test]
    fn unlabelled_hit_takes_clause() {
        let c = config();
        let idx = index(&["配料:小麦粉、含有麸质"]);
        let caps = captures(&idx, &c, FieldKind::Allergens);
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].inline, "含有麸质");
        assert!(!caps[0].labelled);
    }

    #[test]
    fn keywords_inside_continuation_do_not_stop_it() {
        let c = config();
        let idx = index(&["配料:", "小麦粉,白砂糖,植物油(含有大豆)", "净含量:400g"]);
        let caps = captures(&idx, &c, FieldKind::Ingredients);
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].positions, vec![0, 1]);
        assert_eq!(caps[0].value(), "小麦粉,白砂糖,植物油(含有大豆)");
        assert!(!stops_capture("请置于阴凉干燥处贮存", &c));
        assert!(stops_capture("贮存条件:阴凉干燥处", &c));
        assert!(stops_capture("能量 1450kJ", &c));
    }

    #[test]
    fn line_end_separator_kept_between_fragments() {
        let c = config();
        let idx = index(&["贮存条件:常温保存,", "开封后冷藏"]);
        let caps = captures(&idx, &c, FieldKind::StorageConditions);
        assert_eq!(caps[0].value(), "常温保存,开封后冷藏");
        assert_eq!(join_fragments(&["Keep dry,".into(), "and cool".into()]), "Keep dry, and cool");
    }

    #[test]
    fn country_of_origin_is_not_a_date_label() {
        let c = config();
        assert!(anchors_in("Product of China", &c).is_empty());
        let anchors = anchors_in("MFD:2024-03-01", &c);
        assert_eq!(anchors[0].field, FieldKind::DateMarks);
    }

    #[test]
    fn fragments_joined_by_script() {
        assert_eq!(join_fragments(&["全麦粉".into(), "小麦粉".into()]), "全麦粉小麦粉");
        assert_eq!(join_fragments(&["Keep dry".into(), "and cool".into()]), "Keep dry and cool");
        assert_eq!(join_fragments(&["阴凉处".into(), "(20°C)".into()]), "阴凉处 (20°C)");
    }
}
