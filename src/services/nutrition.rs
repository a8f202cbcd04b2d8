//! Nutrition table parsing.
//!
//! Finds the table header, then reads one nutrient per row. Rows are aligned with the
//! header's amount and NRV columns when those can be located; otherwise each row is read
//! left to right (label, amount, percentage). Missing nutrients stay absent.

use crate::config::{CharMap, LabelConfig};
use crate::error::{Diagnostic, LabelError};
use crate::services::fields::anchors::{anchors_in, mean_confidence};
use crate::services::span_index::SpanIndex;
use crate::types::{
    Basis, BoundingBox, Dimension, FieldKind, Method, NutrientEntry, NutrientKind, NutrientUnit, NutritionTable,
    TableLayout,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

const KCAL_TO_KJ: f64 = 4.184;
/// Two consecutive rows without a nutrient label end the table.
const MAX_MISSES: usize = 2;
const SEQUENTIAL_FACTOR: f64 = 0.9;

static AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)\s*(kj|千焦|kcal|千卡|大卡|mg|毫克|μg|µg|ug|微克|g|克)?").unwrap()
});

static PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());

static SERVING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:每份|perserving)[(（]?(\d+(?:\.\d+)?)(g|克|ml|毫升)").unwrap()
});

/// Unit as printed in a table cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintedUnit {
    KiloJoule,
    KiloCalorie,
    Gram,
    Milligram,
    Microgram,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintedAmount {
    pub value: f64,
    pub unit: Option<PrintedUnit>,
}

/// Result of one table parse. `confidence` and `positions` are meaningless when the
/// table is empty.
#[derive(Debug, Clone)]
pub struct TableParse {
    pub table: NutritionTable,
    pub positions: Vec<usize>,
    pub confidence: f64,
    pub method: Method,
    pub diagnostics: Vec<Diagnostic>,
}

impl TableParse {
    fn empty(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            table: NutritionTable::default(),
            positions: Vec::new(),
            confidence: 0.0,
            method: Method::TableSequential,
            diagnostics,
        }
    }
}

enum Header {
    /// Nutrient names across one row.
    Horizontal { row: usize },
    /// Title and/or column captions over one or two rows.
    Titled { rows: Vec<usize> },
}

enum Columns {
    Aligned {
        amount: BoundingBox,
        nrv: Option<BoundingBox>,
    },
    Sequential,
}

pub fn parse_table(index: &SpanIndex, config: &LabelConfig) -> TableParse {
    let Some(header) = find_header(index, config) else {
        debug!("no nutrition header among {} rows", index.rows().len());
        return TableParse::empty(vec![Diagnostic::StructuralAmbiguity {
            detail: "no nutrition table header found".to_string(),
        }]);
    };
    let mut parse = match header {
        Header::Horizontal { row } => parse_horizontal(index, config, row),
        Header::Titled { rows } => parse_titled(index, config, &rows),
    };
    if parse.table.is_empty() {
        parse.diagnostics.push(Diagnostic::StructuralAmbiguity {
            detail: "nutrition header without readable rows".to_string(),
        });
        return TableParse::empty(parse.diagnostics);
    }
    parse.positions.sort_unstable();
    parse.positions.dedup();
    let factor = if parse.method == Method::TableSequential { SEQUENTIAL_FACTOR } else { 1.0 };
    parse.confidence = mean_confidence(index, &parse.positions) * factor;
    parse
}

fn find_header(index: &SpanIndex, config: &LabelConfig) -> Option<Header> {
    let rows = index.rows();
    for (r, row) in rows.iter().enumerate() {
        let mut names: Vec<NutrientKind> = row
            .iter()
            .filter_map(|&p| bare_nutrient_name(index.text(p), config))
            .collect();
        names.sort();
        names.dedup();
        if names.len() >= 3 {
            debug!("horizontal nutrition header at row {}", r);
            return Some(Header::Horizontal { row: r });
        }
        let text = row_text(index, row);
        if title_score(&text, config) + column_score(&text, config) >= 2 {
            let mut header_rows = vec![r];
            if let Some(next) = rows.get(r + 1) {
                let next_text = row_text(index, next);
                let has_values = next.iter().any(|&p| nutrient_label(index.text(p), config).is_some());
                if column_score(&next_text, config) > 0 && !has_values {
                    header_rows.push(r + 1);
                }
            }
            debug!("titled nutrition header at rows {:?}", header_rows);
            return Some(Header::Titled { rows: header_rows });
        }
    }
    None
}

fn row_text(index: &SpanIndex, row: &[usize]) -> String {
    row.iter()
        .map(|&p| index.text(p))
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn title_score(lower: &str, config: &LabelConfig) -> usize {
    if config.nutrition.titles.iter().any(|t| lower.contains(t.as_str())) {
        2
    } else {
        0
    }
}

fn column_score(lower: &str, config: &LabelConfig) -> usize {
    config
        .nutrition
        .columns
        .iter()
        .filter(|c| lower.contains(c.as_str()))
        .count()
}

/// Nutrient named at the start of `text` after list decorations ("—其中:饱和脂肪"),
/// with the byte offset where the name ends. The longest alias wins.
pub fn nutrient_label(text: &str, config: &LabelConfig) -> Option<(NutrientKind, usize)> {
    let lower = text.to_ascii_lowercase();
    let start = skip_label_decorations(&lower);
    let rest = &lower[start..];
    config
        .nutrition
        .nutrients
        .iter()
        .flat_map(|n| n.aliases.iter().map(move |a| (n.kind, a)))
        .filter(|(_, alias)| rest.starts_with(alias.as_str()))
        .max_by_key(|(_, alias)| alias.len())
        .map(|(kind, alias)| (kind, start + alias.len()))
}

/// A span that is only a nutrient name (no amount in it).
fn bare_nutrient_name(text: &str, config: &LabelConfig) -> Option<NutrientKind> {
    let (kind, end) = nutrient_label(text, config)?;
    (!text[end..].chars().any(|c| c.is_ascii_digit())).then_some(kind)
}

fn skip_label_decorations(s: &str) -> usize {
    let mut rest = s;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| {
            c.is_whitespace() || matches!(c, '—' | '-' | '－' | '·' | '•' | ':')
        });
        let trimmed = trimmed.strip_prefix("其中").unwrap_or(trimmed);
        if trimmed.len() == rest.len() {
            break;
        }
        rest = trimmed;
    }
    s.len() - rest.len()
}

/// A labelled anchor of some other field means the table is over.
fn starts_other_field(text: &str, config: &LabelConfig) -> bool {
    anchors_in(text, config)
        .iter()
        .any(|a| a.labelled && a.field != FieldKind::Nutrition)
}

/// Per-100 / per-serving basis named in header text.
pub fn detect_basis(text: &str) -> Basis {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if compact.contains("100ml") || compact.contains("100毫升") {
        return Basis::Per100ml;
    }
    if compact.contains("100g") || compact.contains("100克") {
        return Basis::Per100g;
    }
    if compact.contains("每份") || compact.contains("perserving") {
        let serving = SERVING.captures(&compact).and_then(|c| {
            let size: f64 = c[1].parse().ok()?;
            let dimension = match &c[2] {
                "ml" | "毫升" => Dimension::Volume,
                _ => Dimension::Mass,
            };
            Some((size, dimension))
        });
        return Basis::PerServing {
            size: serving.map(|s| s.0),
            dimension: serving.map(|s| s.1),
        };
    }
    Basis::Per100g
}

/// Leading number and unit of a table cell. Look-alike letters in the number are
/// corrected and a leading '<' / '≤' is dropped.
pub fn parse_amount(token: &str, run: &CharMap) -> Result<PrintedAmount, LabelError> {
    let malformed = || LabelError::MalformedNumeric(token.trim().to_string());
    let trimmed = token
        .trim_start_matches(|c: char| c.is_whitespace() || c == ':')
        .trim_start_matches(['<', '≤', '＜'])
        .trim_start();
    let fixed = fix_leading_number(trimmed, run).to_ascii_lowercase();
    let caps = AMOUNT.captures(&fixed).ok_or_else(malformed)?;
    let whole = caps.get(0).ok_or_else(malformed)?;
    if caps.get(2).is_none() && fixed[whole.end()..].trim_start().starts_with('%') {
        return Err(malformed());
    }
    let value: f64 = caps[1].parse().map_err(|_| malformed())?;
    let unit = caps.get(2).map(|u| match u.as_str() {
        "kj" | "千焦" => PrintedUnit::KiloJoule,
        "kcal" | "千卡" | "大卡" => PrintedUnit::KiloCalorie,
        "mg" | "毫克" => PrintedUnit::Milligram,
        "g" | "克" => PrintedUnit::Gram,
        _ => PrintedUnit::Microgram,
    });
    Ok(PrintedAmount { value, unit })
}

fn fix_leading_number(s: &str, run: &CharMap) -> String {
    let mut out = String::with_capacity(s.len());
    let mut leading = true;
    for c in s.chars() {
        if leading {
            if let Some(fixed) = run.get(c) {
                out.push(fixed);
                continue;
            }
            leading = c.is_ascii_digit() || c == '.';
        }
        out.push(c);
    }
    out
}

/// Amount in the nutrient's canonical unit, `None` when the printed unit is of another kind.
pub fn to_canonical(nutrient: NutrientKind, amount: PrintedAmount) -> Option<f64> {
    let v = amount.value;
    match (nutrient.canonical_unit(), amount.unit) {
        (NutrientUnit::KiloJoule, None | Some(PrintedUnit::KiloJoule)) => Some(v),
        (NutrientUnit::KiloJoule, Some(PrintedUnit::KiloCalorie)) => Some(v * KCAL_TO_KJ),
        (NutrientUnit::Gram, None | Some(PrintedUnit::Gram)) => Some(v),
        (NutrientUnit::Gram, Some(PrintedUnit::Milligram)) => Some(v / 1000.0),
        (NutrientUnit::Gram, Some(PrintedUnit::Microgram)) => Some(v / 1_000_000.0),
        (NutrientUnit::Milligram, None | Some(PrintedUnit::Milligram)) => Some(v),
        (NutrientUnit::Milligram, Some(PrintedUnit::Gram)) => Some(v * 1000.0),
        (NutrientUnit::Milligram, Some(PrintedUnit::Microgram)) => Some(v / 1000.0),
        _ => None,
    }
}

/// Declared NRV percentage in a cell ("17%", "17 %").
pub fn parse_percent(text: &str) -> Option<u32> {
    let caps = PERCENT.captures(text)?;
    let value: f64 = caps[1].parse().ok()?;
    value.is_finite().then(|| value.round() as u32)
}

/// Collects entries for one table, first reading of a nutrient wins.
struct TableBuilder<'a> {
    config: &'a LabelConfig,
    basis: Basis,
    entries: Vec<NutrientEntry>,
    positions: Vec<usize>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> TableBuilder<'a> {
    fn new(config: &'a LabelConfig, basis: Basis) -> Self {
        Self {
            config,
            basis,
            entries: Vec::new(),
            positions: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn add(&mut self, nutrient: NutrientKind, amount_text: &str, nrv_text: Option<&str>, sources: Vec<usize>) {
        if self.entries.iter().any(|e| e.nutrient == nutrient) {
            return;
        }
        let malformed = |token: &str| Diagnostic::MalformedNumeric {
            nutrient,
            token: token.trim().to_string(),
        };
        let amount = match parse_amount(amount_text, &self.config.numeric_confusions.run) {
            Ok(amount) => amount,
            Err(e) => {
                debug!("{:?}: {}", nutrient, e);
                self.diagnostics.push(malformed(amount_text));
                return;
            }
        };
        let Some(value) = to_canonical(nutrient, amount).filter(|v| v.is_finite()) else {
            self.diagnostics.push(malformed(amount_text));
            return;
        };
        self.positions.extend(sources.iter().copied());
        self.entries.push(NutrientEntry {
            nutrient,
            amount: value,
            unit: nutrient.canonical_unit(),
            basis: self.basis,
            declared_nrv: nrv_text.and_then(parse_percent),
            source_spans: sources,
        });
    }

    fn finish(self, layout: TableLayout, method: Method, header_positions: Vec<usize>) -> TableParse {
        let mut positions = header_positions;
        positions.extend(self.positions);
        TableParse {
            table: NutritionTable {
                entries: self.entries,
                nrv: Vec::new(),
                basis: self.basis,
                layout: Some(layout),
            },
            positions,
            confidence: 0.0,
            method,
            diagnostics: self.diagnostics,
        }
    }
}

fn parse_titled(index: &SpanIndex, config: &LabelConfig, header_rows: &[usize]) -> TableParse {
    let rows = index.rows();
    let header_positions: Vec<usize> = header_rows.iter().flat_map(|&r| rows[r].iter().copied()).collect();
    let find_column = |keywords: &[String]| {
        header_positions.iter().copied().find(|&p| {
            let lower = index.text(p).to_ascii_lowercase();
            keywords.iter().any(|k| lower.contains(k.as_str()))
        })
    };
    let amount_col = find_column(&config.nutrition.amount_columns);
    let nrv_col = find_column(&config.nutrition.nrv_columns);

    let mut diagnostics = Vec::new();
    let columns = match (amount_col, nrv_col) {
        (Some(a), Some(n)) if a == n => {
            diagnostics.push(Diagnostic::StructuralAmbiguity {
                detail: "amount and NRV columns share one header cell".to_string(),
            });
            Columns::Sequential
        }
        (Some(a), nrv) => Columns::Aligned {
            amount: *index.bbox(a),
            nrv: nrv.map(|n| *index.bbox(n)),
        },
        (None, _) => {
            diagnostics.push(Diagnostic::StructuralAmbiguity {
                detail: "no amount column in nutrition header".to_string(),
            });
            Columns::Sequential
        }
    };
    if matches!(columns, Columns::Sequential) {
        debug!("nutrition rows read sequentially");
    }

    let basis = match (&columns, amount_col) {
        (Columns::Aligned { .. }, Some(a)) => detect_basis(index.text(a)),
        _ => detect_basis(&row_text(index, &header_positions)),
    };

    let mut builder = TableBuilder::new(config, basis);
    builder.diagnostics = diagnostics;
    let first = header_rows.last().map_or(0, |r| r + 1);
    let mut misses = 0;
    let mut read = 0;
    for row in rows.iter().skip(first) {
        if read >= config.nutrition.max_rows || row.iter().any(|&p| starts_other_field(index.text(p), config)) {
            break;
        }
        let Some((label_pos, nutrient, name_end)) = row
            .iter()
            .find_map(|&p| nutrient_label(index.text(p), config).map(|(k, end)| (p, k, end)))
        else {
            misses += 1;
            if misses >= MAX_MISSES {
                break;
            }
            continue;
        };
        misses = 0;
        read += 1;

        let remainder = index.text(label_pos)[name_end..].trim();
        let others: Vec<usize> = row.iter().copied().filter(|&p| p != label_pos).collect();
        let mut sources = vec![label_pos];
        let (amount_text, nrv_text) = match &columns {
            Columns::Aligned { amount, nrv } if !others.is_empty() => {
                let mut amount_cell = None;
                let mut nrv_cell = None;
                for &p in &others {
                    let cx = index.bbox(p).center().x;
                    let to_amount = (cx - amount.center().x).abs();
                    let to_nrv = nrv.map_or(f64::INFINITY, |n| (cx - n.center().x).abs());
                    let cell = if to_nrv < to_amount { &mut nrv_cell } else { &mut amount_cell };
                    if cell.is_none() {
                        *cell = Some(p);
                        sources.push(p);
                    }
                }
                let amount_text = amount_cell.map_or(remainder.to_string(), |p| index.text(p).to_string());
                (amount_text, nrv_cell.map(|p| index.text(p).to_string()))
            }
            _ => {
                sources.extend(others.iter().copied());
                let mut parts = vec![remainder.to_string()];
                parts.extend(others.iter().map(|&p| index.text(p).to_string()));
                let combined = parts.join(" ").trim().to_string();
                let nrv = PERCENT.is_match(&combined).then(|| combined.clone());
                (combined, nrv)
            }
        };
        builder.add(nutrient, &amount_text, nrv_text.as_deref(), sources);
    }

    let method = match columns {
        Columns::Aligned { .. } => Method::TableAligned,
        Columns::Sequential => Method::TableSequential,
    };
    builder.finish(TableLayout::Titled, method, header_positions)
}

fn parse_horizontal(index: &SpanIndex, config: &LabelConfig, header_row: usize) -> TableParse {
    let rows = index.rows();
    let headers: Vec<(usize, NutrientKind)> = rows[header_row]
        .iter()
        .filter_map(|&p| bare_nutrient_name(index.text(p), config).map(|k| (p, k)))
        .collect();

    let mut basis_text = String::new();
    for r in header_row.saturating_sub(1)..(header_row + 2).min(rows.len()) {
        basis_text.push_str(&row_text(index, &rows[r]));
        basis_text.push(' ');
    }
    let mut builder = TableBuilder::new(config, detect_basis(&basis_text));

    let amount_row = rows.get(header_row + 1);
    let nrv_row = rows
        .get(header_row + 2)
        .filter(|row| row.iter().any(|&p| index.text(p).contains('%')));
    for &(header_pos, nutrient) in &headers {
        let column = index.bbox(header_pos);
        let Some(cell) = amount_row.and_then(|row| nearest_in_column(index, row, column)) else {
            continue;
        };
        let mut sources = vec![header_pos, cell];
        let nrv_cell = nrv_row.and_then(|row| nearest_in_column(index, row, column));
        if let Some(p) = nrv_cell {
            sources.push(p);
        }
        builder.add(nutrient, index.text(cell), nrv_cell.map(|p| index.text(p)), sources);
    }
    let header_positions = headers.iter().map(|(p, _)| *p).collect();
    builder.finish(TableLayout::Horizontal, Method::TableAligned, header_positions)
}

/// Span of `row` sitting under `column`: widest horizontal overlap, else nearest center.
fn nearest_in_column(index: &SpanIndex, row: &[usize], column: &BoundingBox) -> Option<usize> {
    let overlapping = row
        .iter()
        .copied()
        .map(|p| (p, index.bbox(p).horizontal_overlap(column)))
        .filter(|(_, overlap)| *overlap > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(p, _)| p);
    overlapping.or_else(|| {
        let cx = column.center().x;
        row.iter()
            .copied()
            .min_by(|&a, &b| {
                let da = (index.bbox(a).center().x - cx).abs();
                let db = (index.bbox(b).center().x - cx).abs();
                da.total_cmp(&db).then(a.cmp(&b))
            })
    })
}
