//! Reading order over normalized spans.
//!
//! Spans are clustered into rows by vertical overlap, rows run top to bottom and spans
//! left to right inside a row. Ties fall back to input position, so the order is total.
//! Every lookup works on reading-order positions (`0..len()`).

use crate::types::{BoundingBox, TextSpan};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct SpanIndex {
    spans: Vec<TextSpan>,
    boxes: Vec<BoundingBox>,
    rows: Vec<Vec<usize>>,
    row_of: Vec<usize>,
    median_height: f64,
}

impl SpanIndex {
    pub fn build(spans: Vec<TextSpan>, row_overlap_ratio: f64) -> Self {
        let boxes: Vec<BoundingBox> = spans.iter().map(|s| s.bbox()).collect();

        let mut by_center: Vec<usize> = (0..spans.len()).collect();
        by_center.sort_by(|&a, &b| {
            boxes[a]
                .center()
                .y
                .total_cmp(&boxes[b].center().y)
                .then(boxes[a].x_min.total_cmp(&boxes[b].x_min))
                .then(a.cmp(&b))
        });

        // Rows of input indices; each row tracks its mean vertical extent.
        let mut input_rows: Vec<(Vec<usize>, f64, f64)> = Vec::new();
        for i in by_center {
            let b = boxes[i];
            let joins = input_rows
                .last()
                .map(|(members, top, bottom)| {
                    let n = members.len() as f64;
                    shares_row(&b, top / n, bottom / n, row_overlap_ratio)
                })
                .unwrap_or(false);
            match input_rows.last_mut() {
                Some((members, top, bottom)) if joins => {
                    members.push(i);
                    *top += b.y_min;
                    *bottom += b.y_max;
                }
                _ => input_rows.push((vec![i], b.y_min, b.y_max)),
            }
        }

        let mut order = Vec::with_capacity(spans.len());
        let mut rows = Vec::with_capacity(input_rows.len());
        for (mut members, _, _) in input_rows {
            members.sort_by(|&a, &b| boxes[a].x_min.total_cmp(&boxes[b].x_min).then(a.cmp(&b)));
            let start = order.len();
            order.extend(members);
            rows.push((start..order.len()).collect::<Vec<usize>>());
        }

        let mut row_of = vec![0; order.len()];
        for (r, row) in rows.iter().enumerate() {
            for &pos in row {
                row_of[pos] = r;
            }
        }

        let mut slots: Vec<Option<TextSpan>> = spans.into_iter().map(Some).collect();
        let spans: Vec<TextSpan> = order.iter().filter_map(|&i| slots[i].take()).collect();
        let boxes: Vec<BoundingBox> = order.iter().map(|&i| boxes[i]).collect();
        let median_height = median(boxes.iter().map(|b| b.height()).collect());

        Self {
            spans,
            boxes,
            rows,
            row_of,
            median_height,
        }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<&TextSpan> {
        self.spans.get(pos)
    }

    /// Span at a known-valid reading position.
    pub fn span(&self, pos: usize) -> &TextSpan {
        &self.spans[pos]
    }

    pub fn text(&self, pos: usize) -> &str {
        &self.spans[pos].text
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TextSpan)> {
        self.spans.iter().enumerate()
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.rows
    }

    pub fn row_of(&self, pos: usize) -> usize {
        self.row_of[pos]
    }

    pub fn bbox(&self, pos: usize) -> &BoundingBox {
        &self.boxes[pos]
    }

    pub fn median_height(&self) -> f64 {
        self.median_height
    }

    /// Positions after `pos` in reading order.
    pub fn following(&self, pos: usize) -> std::ops::Range<usize> {
        (pos + 1).min(self.len())..self.len()
    }

    /// Same-row neighbour on the left, if any.
    pub fn left_neighbor(&self, pos: usize) -> Option<usize> {
        let row = &self.rows[self.row_of[pos]];
        let idx = row.iter().position(|&p| p == pos)?;
        idx.checked_sub(1).map(|i| row[i])
    }

    /// Positions whose centers lie within `factor` median heights of `pos`'s center,
    /// nearest first. `pos` itself is excluded.
    pub fn within_radius(&self, pos: usize, factor: f64) -> Vec<usize> {
        let radius = factor * self.median_height.max(1.0);
        let c = self.boxes[pos].center();
        let mut hits: Vec<(f64, usize)> = self
            .boxes
            .iter()
            .enumerate()
            .filter(|&(p, _)| p != pos)
            .filter_map(|(p, b)| {
                let o = b.center();
                let d = ((o.x - c.x).powi(2) + (o.y - c.y).powi(2)).sqrt();
                (d <= radius).then_some((d, p))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, p)| p).collect()
    }

    pub fn positions_where<F>(&self, predicate: F) -> Vec<usize>
    where
        F: Fn(usize, &TextSpan) -> bool,
    {
        self.iter().filter(|(p, s)| predicate(*p, s)).map(|(p, _)| p).collect()
    }

    /// Positions whose top edge lies in the top `fraction` of the document's vertical extent.
    pub fn top_region(&self, fraction: f64) -> Vec<usize> {
        let (Some(top), Some(bottom)) = (
            self.boxes.iter().map(|b| b.y_min).min_by(|a, b| a.total_cmp(b)),
            self.boxes.iter().map(|b| b.y_max).max_by(|a, b| a.total_cmp(b)),
        ) else {
            return Vec::new();
        };
        let limit = top + (bottom - top) * fraction;
        self.positions_where(|p, _| self.boxes[p].y_min <= limit)
    }

    /// Vertical gap between the bottom of `a` and the top of `b`, in median heights.
    pub fn gap_in_heights(&self, a: usize, b: usize) -> f64 {
        let gap = (self.boxes[b].y_min - self.boxes[a].y_max).max(0.0);
        gap / self.median_height.max(1.0)
    }
}

fn shares_row(b: &BoundingBox, row_top: f64, row_bottom: f64, ratio: f64) -> bool {
    let row_height = row_bottom - row_top;
    let smaller = b.height().min(row_height);
    if smaller <= 0.0 {
        return b.center().y == (row_top + row_bottom) / 2.0;
    }
    let overlap = (b.y_max.min(row_bottom) - b.y_min.max(row_top)).max(0.0);
    overlap / smaller >= ratio
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
