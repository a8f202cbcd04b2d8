//! License number, product standard code, quality grade and commodity barcode.

use super::{anchored_then_pattern, digit_isolated};
use crate::config::LabelConfig;
use crate::services::span_index::SpanIndex;
use crate::types::{FieldCandidate, FieldKind, FieldValue};
use once_cell::sync::Lazy;
use regex::Regex;

const UNANCHORED_LICENSE: f64 = 0.9;
const UNANCHORED_STANDARD: f64 = 0.75;
const UNANCHORED_GRADE: f64 = 0.55;
const UNANCHORED_BARCODE: f64 = 0.8;
const BAD_CHECKSUM: f64 = 0.5;

/// Labelling standards cited on every label; never the product standard.
const LABELLING_STANDARDS: &[&str] = &["7718", "28050"];

static LICENSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"SC\d{14}|QS\d{12}").unwrap());

static STANDARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(GB|QB|NY|SB|LS|SN|GH|DB\s*\d{2})\s*(/\s*T)?\s*(\d{3,6})(?:\s*[.．]\s*(\d+))?(?:\s*[-—]\s*(\d{4}))?")
        .unwrap()
});

static ENTERPRISE_STANDARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Q\s*/\s*([0-9A-Z]{2,12})\s*(\d{4}S?)(?:\s*[-—]\s*(\d{4}))?").unwrap()
});

static GRADE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"特级|优级|一级|二级|三级|合格品|优等品|一等品|二等品|特等品").unwrap());

static BARCODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{13}").unwrap());

pub fn license_number(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    anchored_then_pattern(
        index,
        config,
        FieldKind::LicenseNumber,
        UNANCHORED_LICENSE,
        |text, _| find_license(text).map(|l| (FieldValue::Text(l), 1.0)),
    )
}

/// "SC" + 14 digits or "QS" + 12 digits, spaces inside the number tolerated.
pub fn find_license(text: &str) -> Option<String> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    LICENSE
        .find_iter(&compact)
        .find(|m| !compact[m.end()..].starts_with(|c: char| c.is_ascii_digit()))
        .map(|m| m.as_str().to_string())
}

pub fn standard_code(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    anchored_then_pattern(
        index,
        config,
        FieldKind::StandardCode,
        UNANCHORED_STANDARD,
        |text, _| find_standard(text).map(|s| (FieldValue::Text(s), 1.0)),
    )
}

/// First product standard in canonical form ("GB/T 20977-2007", "Q/ABC 0001S-2020").
pub fn find_standard(text: &str) -> Option<String> {
    let national = STANDARD.captures_iter(text).find_map(|c| {
        let number = c.get(3)?.as_str();
        if LABELLING_STANDARDS.contains(&number) {
            return None;
        }
        let prefix: String = c[1].chars().filter(|ch| !ch.is_whitespace()).collect::<String>().to_ascii_uppercase();
        let mut code = prefix;
        if c.get(2).is_some() {
            code.push_str("/T");
        }
        code.push(' ');
        code.push_str(number);
        if let Some(part) = c.get(4) {
            code.push('.');
            code.push_str(part.as_str());
        }
        if let Some(year) = c.get(5) {
            code.push('-');
            code.push_str(year.as_str());
        }
        Some(code)
    });
    national.or_else(|| {
        let c = ENTERPRISE_STANDARD.captures(text)?;
        let mut code = format!("Q/{} {}", c[1].to_ascii_uppercase(), c[2].to_ascii_uppercase());
        if let Some(year) = c.get(3) {
            code.push('-');
            code.push_str(year.as_str());
        }
        Some(code)
    })
}

pub fn quality_grade(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    anchored_then_pattern(
        index,
        config,
        FieldKind::QualityGrade,
        UNANCHORED_GRADE,
        |text, _| GRADE.find(text).map(|m| (FieldValue::Text(m.as_str().to_string()), 1.0)),
    )
}

pub fn commodity_barcode(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    // without a label only Chinese-registered codes (prefix 69) are trusted
    anchored_then_pattern(
        index,
        config,
        FieldKind::CommodityBarcode,
        UNANCHORED_BARCODE,
        |text, anchored| find_barcode(text, !anchored),
    )
}

fn find_barcode(text: &str, require_cn_prefix: bool) -> Option<(FieldValue, f64)> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let code = BARCODE
        .find_iter(&compact)
        .filter(|m| digit_isolated(&compact, m.start(), m.end()))
        .map(|m| m.as_str())
        .find(|code| !require_cn_prefix || code.starts_with("69"))?;
    let factor = if ean13_valid(code) { 1.0 } else { BAD_CHECKSUM };
    Some((FieldValue::Text(code.to_string()), factor))
}

/// EAN-13 check digit over 13 ASCII digits.
pub fn ean13_valid(code: &str) -> bool {
    let digits: Vec<u32> = code.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 13 {
        return false;
    }
    let sum: u32 = digits[..12]
        .iter()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { *d } else { d * 3 })
        .sum();
    (10 - sum % 10) % 10 == digits[12]
}
