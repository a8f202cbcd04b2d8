//! Production date, expiry date and shelf life.

use super::anchors::{captures, mean_confidence};
use crate::config::LabelConfig;
use crate::services::span_index::SpanIndex;
use crate::types::{DateMarks, DurationUnit, FieldCandidate, FieldKind, FieldValue, Method, ShelfLife};
use chrono::{Days, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// A production date with neither an end date nor a shelf life is weak evidence.
const PRODUCTION_ONLY: f64 = 0.4;

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})\s*日?").unwrap()
});

static COMPACT_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\D)(20\d{2})(\d{2})(\d{2})(?:\D|$)").unwrap());

static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+|[一二两三四五六七八九十百]+)\s*(个月|月|天|日|周|星期|年)").unwrap()
});

/// First calendar date in `text`, in any of the printed forms.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let ymd = |y: &str, m: &str, d: &str| {
        NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
    };
    DATE.captures_iter(text)
        .find_map(|c| ymd(&c[1], &c[2], &c[3]))
        .or_else(|| COMPACT_DATE.captures_iter(text).find_map(|c| ymd(&c[1], &c[2], &c[3])))
}

/// "12个月", "十八个月", "180天".
pub fn parse_shelf_life(text: &str) -> Option<ShelfLife> {
    let caps = DURATION.captures(text)?;
    let amount = caps[1]
        .parse::<u32>()
        .ok()
        .or_else(|| parse_chinese_number(&caps[1]))?;
    let unit = match &caps[2] {
        "天" | "日" => DurationUnit::Day,
        "周" | "星期" => DurationUnit::Week,
        "个月" | "月" => DurationUnit::Month,
        _ => DurationUnit::Year,
    };
    (amount > 0).then_some(ShelfLife { amount, unit })
}

/// Chinese numerals up to the hundreds ("十八", "二十四", "一百八十").
pub fn parse_chinese_number(s: &str) -> Option<u32> {
    let digit = |c: char| match c {
        '一' => Some(1),
        '二' | '两' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    };
    let mut total = 0u32;
    let mut pending: Option<u32> = None;
    for c in s.chars() {
        match c {
            '百' => {
                total += pending.take().unwrap_or(1) * 100;
            }
            '十' => {
                total += pending.take().unwrap_or(1) * 10;
            }
            _ => {
                if pending.is_some() {
                    return None;
                }
                pending = Some(digit(c)?);
            }
        }
    }
    let value = total + pending.unwrap_or(0);
    (value > 0).then_some(value)
}

/// Production date plus shelf life.
pub fn derive_expiry(production: NaiveDate, life: ShelfLife) -> Option<NaiveDate> {
    match life.unit {
        DurationUnit::Day => production.checked_add_days(Days::new(life.amount as u64)),
        DurationUnit::Week => production.checked_add_days(Days::new(life.amount as u64 * 7)),
        DurationUnit::Month => production.checked_add_months(Months::new(life.amount)),
        DurationUnit::Year => production.checked_add_months(Months::new(life.amount.checked_mul(12)?)),
    }
}

enum Mark {
    Production,
    Expiry,
    ShelfLife,
}

fn classify(keyword: &str, config: &LabelConfig) -> Option<Mark> {
    let dates = &config.dates;
    if dates.expiry.iter().any(|k| k == keyword) {
        Some(Mark::Expiry)
    } else if dates.shelf_life.iter().any(|k| k == keyword) {
        Some(Mark::ShelfLife)
    } else if dates.production.iter().any(|k| k == keyword) {
        Some(Mark::Production)
    } else {
        None
    }
}

pub fn date_marks(index: &SpanIndex, config: &LabelConfig) -> Vec<FieldCandidate> {
    let mut marks = DateMarks::default();
    let mut positions = Vec::new();
    for capture in captures(index, config, FieldKind::DateMarks) {
        let Some(mark) = classify(&capture.keyword, config) else {
            continue;
        };
        let value = capture.value();
        let mut used = false;
        match mark {
            Mark::Production => {
                if marks.production_date.is_none() {
                    if let Some(date) = parse_date(&value) {
                        marks.production_date = Some(date);
                        used = true;
                    } else if let Some(note) = see_package(&value, config) {
                        marks.production_note.get_or_insert(note);
                        used = true;
                    }
                }
            }
            Mark::Expiry => {
                if marks.expiry_date.is_none() {
                    marks.expiry_date = parse_date(&value);
                    used = marks.expiry_date.is_some();
                }
            }
            Mark::ShelfLife => {
                // "保质期:2025年06月30日" prints the end date under the shelf life label
                if let Some(date) = parse_date(&value) {
                    if marks.expiry_date.is_none() {
                        marks.expiry_date = Some(date);
                        used = true;
                    }
                } else if marks.shelf_life.is_none() {
                    marks.shelf_life = parse_shelf_life(&value);
                    used = marks.shelf_life.is_some();
                }
            }
        }
        if used {
            positions.extend(capture.positions.iter().copied());
        }
    }

    if marks.is_empty() {
        return Vec::new();
    }
    if marks.expiry_date.is_none() {
        if let (Some(production), Some(life)) = (marks.production_date, marks.shelf_life) {
            marks.expiry_date = derive_expiry(production, life);
            marks.expiry_derived = marks.expiry_date.is_some();
        }
    }
    let factor = if marks.has_end() { 1.0 } else { PRODUCTION_ONLY };
    positions.sort_unstable();
    positions.dedup();
    let confidence = mean_confidence(index, &positions) * factor;
    vec![FieldCandidate::new(
        FieldKind::DateMarks,
        FieldValue::Dates(marks),
        positions,
        confidence,
        Method::Anchored,
    )]
}

fn see_package(value: &str, config: &LabelConfig) -> Option<String> {
    config
        .dates
        .see_package
        .iter()
        .find(|k| value.contains(k.as_str()))
        .map(|_| value.to_string())
}
