//! Adapters from OCR engine results to [`TextSpan`]s.
//!
//! Accepted shapes:
//! - PaddleOCR lines `[[[x,y]×4], [text, score]]`, optionally wrapped in a list of pages
//! - PaddleX results `{"rec_texts": [...], "rec_scores": [...], "rec_polys": [...]}`,
//!   optionally under `"res"`
//! - an array of `{"text", "polygon", "confidence"}` objects
//! - geometry-less [`OcrLine`]s, laid out one synthetic row per line

use crate::error::LabelError;
use crate::types::{OcrLine, Point, TextSpan};
use serde_json::Value;
use tracing::debug;

const LINE_PITCH: f64 = 20.0;
const LINE_HEIGHT: f64 = 16.0;
const CHAR_WIDTH: f64 = 16.0;

pub fn spans_from_json_str(json: &str) -> Result<Vec<TextSpan>, LabelError> {
    let value: Value = serde_json::from_str(json)?;
    spans_from_value(&value)
}

pub fn spans_from_value(value: &Value) -> Result<Vec<TextSpan>, LabelError> {
    match value {
        Value::Object(obj) => {
            if let Some(inner) = obj.get("res") {
                return spans_from_value(inner);
            }
            if obj.contains_key("rec_texts") {
                return paddlex_spans(value);
            }
            Err(LabelError::UnrecognizedShape(
                "object without rec_texts or res".to_string(),
            ))
        }
        Value::Array(items) => {
            let Some(first) = items.iter().find(|v| !v.is_null()) else {
                return Ok(Vec::new());
            };
            if is_paddle_line(first) {
                paddle_lines(items, 0)
            } else if first.is_object() {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| object_span(item, i))
                    .collect()
            } else if first.is_array() {
                // list of pages
                let mut spans = Vec::new();
                for page in items {
                    let Some(lines) = page.as_array() else {
                        continue;
                    };
                    spans.extend(paddle_lines(lines, spans.len())?);
                }
                Ok(spans)
            } else {
                Err(LabelError::UnrecognizedShape(format!("array of {}", kind_of(first))))
            }
        }
        other => Err(LabelError::UnrecognizedShape(kind_of(other).to_string())),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_paddle_line(value: &Value) -> bool {
    value
        .as_array()
        .filter(|pair| pair.len() == 2 && pair[0].is_array())
        .and_then(|pair| pair[1].as_array())
        .and_then(|rec| rec.first())
        .map_or(false, Value::is_string)
}

fn paddle_lines(lines: &[Value], offset: usize) -> Result<Vec<TextSpan>, LabelError> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let index = offset + i;
            let pair = line
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| malformed(index, "expected [polygon, [text, score]]"))?;
            let polygon = parse_polygon(&pair[0], index)?;
            let rec = pair[1].as_array().ok_or_else(|| malformed(index, "recognition is not a list"))?;
            let text = rec
                .first()
                .and_then(|t| t.as_str())
                .ok_or_else(|| malformed(index, "missing text"))?;
            let confidence = rec
                .get(1)
                .and_then(|c| c.as_f64())
                .ok_or_else(|| malformed(index, "missing score"))?;
            Ok(TextSpan::new(text, polygon, confidence))
        })
        .collect()
}

fn paddlex_spans(value: &Value) -> Result<Vec<TextSpan>, LabelError> {
    let empty: Vec<Value> = vec![];
    let texts = value.get("rec_texts").and_then(|t| t.as_array()).unwrap_or(&empty);
    let scores = value.get("rec_scores").and_then(|s| s.as_array()).unwrap_or(&empty);
    let polys = value
        .get("rec_polys")
        .or_else(|| value.get("dt_polys"))
        .and_then(|p| p.as_array())
        .unwrap_or(&empty);
    if scores.len() != texts.len() || polys.len() != texts.len() {
        return Err(LabelError::UnrecognizedShape(format!(
            "{} texts, {} scores, {} polygons",
            texts.len(),
            scores.len(),
            polys.len()
        )));
    }
    texts
        .iter()
        .zip(scores)
        .zip(polys)
        .enumerate()
        .map(|(i, ((text, score), poly))| {
            let text = text.as_str().ok_or_else(|| malformed(i, "text is not a string"))?;
            let confidence = score.as_f64().ok_or_else(|| malformed(i, "score is not a number"))?;
            Ok(TextSpan::new(text, parse_polygon(poly, i)?, confidence))
        })
        .collect()
}

fn object_span(item: &Value, index: usize) -> Result<TextSpan, LabelError> {
    let text = item
        .get("text")
        .and_then(|t| t.as_str())
        .ok_or_else(|| malformed(index, "missing text"))?;
    let confidence = item
        .get("confidence")
        .or_else(|| item.get("score"))
        .and_then(|c| c.as_f64())
        .unwrap_or(1.0);
    let polygon = match (item.get("polygon"), item.get("bbox")) {
        (Some(poly), _) => parse_polygon(poly, index)?,
        (None, Some(bbox)) => parse_bbox(bbox, index)?,
        (None, None) => return Err(malformed(index, "missing polygon")),
    };
    Ok(TextSpan::new(text, polygon, confidence))
}

/// Points as `[x, y]` pairs or `{"x", "y"}` objects.
fn parse_polygon(value: &Value, index: usize) -> Result<Vec<Point>, LabelError> {
    let points = value.as_array().ok_or_else(|| malformed(index, "polygon is not a list"))?;
    points
        .iter()
        .map(|p| {
            let (x, y) = match p {
                Value::Array(xy) if xy.len() >= 2 => (xy[0].as_f64(), xy[1].as_f64()),
                Value::Object(_) => (p.get("x").and_then(|v| v.as_f64()), p.get("y").and_then(|v| v.as_f64())),
                _ => (None, None),
            };
            match (x, y) {
                (Some(x), Some(y)) => Ok(Point::new(x, y)),
                _ => Err(malformed(index, "point is not numeric")),
            }
        })
        .collect()
}

/// `[x_min, y_min, x_max, y_max]`.
fn parse_bbox(value: &Value, index: usize) -> Result<Vec<Point>, LabelError> {
    let coords: Vec<f64> = value
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_default();
    let &[x0, y0, x1, y1] = coords.as_slice() else {
        return Err(malformed(index, "bbox needs four numbers"));
    };
    Ok(vec![Point::new(x0, y0), Point::new(x1, y0), Point::new(x1, y1), Point::new(x0, y1)])
}

fn malformed(index: usize, reason: &str) -> LabelError {
    LabelError::MalformedSpan {
        index,
        reason: reason.to_string(),
    }
}

/// Lines from an engine without geometry, stacked top to bottom in the given order.
pub fn spans_from_lines(lines: &[OcrLine]) -> Vec<TextSpan> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let width = line.text.chars().count().max(1) as f64 * CHAR_WIDTH;
            TextSpan::from_rect(
                line.text.as_str(),
                0.0,
                i as f64 * LINE_PITCH,
                width,
                LINE_HEIGHT,
                line.confidence.unwrap_or(1.0),
            )
        })
        .collect()
}

/// Rejects spans the engine cannot place: empty or non-finite polygons, confidence
/// outside [0, 1].
pub fn validate_spans(spans: &[TextSpan]) -> Result<(), LabelError> {
    for (index, span) in spans.iter().enumerate() {
        if span.polygon.is_empty() {
            return Err(malformed(index, "empty polygon"));
        }
        if span.polygon.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(malformed(index, "non-finite coordinate"));
        }
        if !(0.0..=1.0).contains(&span.confidence) {
            return Err(malformed(index, "confidence outside [0, 1]"));
        }
    }
    Ok(())
}

/// Drops spans at or below `min_confidence`.
pub fn filter_confident(spans: Vec<TextSpan>, min_confidence: f64) -> Vec<TextSpan> {
    let before = spans.len();
    let kept: Vec<TextSpan> = spans.into_iter().filter(|s| s.confidence > min_confidence).collect();
    if kept.len() < before {
        debug!("dropped {} span(s) at or below confidence {}", before - kept.len(), min_confidence);
    }
    kept
}
