//! Winner selection, confidence floors, cross-field sanity checks and the aggregate score.

use crate::config::LabelConfig;
use crate::error::Diagnostic;
use crate::models::{FieldResult, FieldStatus, LabelRecord};
use crate::types::{
    format_amount, Basis, Dimension, FieldCandidate, FieldKind, FieldValue, NutrientKind, NutritionTable, Quantity,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const MAX_MACROS_PER_100: f64 = 105.0;
const MAX_ENERGY_PER_100: f64 = 4000.0;
/// Net content may sit at most two orders of magnitude from a 100 g/ml basis (1 g to 10 kg).
const MAX_BASIS_ORDERS: f64 = 2.0;
const MACROS: [NutrientKind; 3] = [NutrientKind::Protein, NutrientKind::Fat, NutrientKind::Carbohydrate];

/// Total order on candidates of one field: confidence descending, then earlier reading position.
pub fn rank(a: &FieldCandidate, b: &FieldCandidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.position().cmp(&b.position()))
}

pub fn assemble(candidates: Vec<FieldCandidate>, mut diagnostics: Vec<Diagnostic>, config: &LabelConfig) -> LabelRecord {
    let mut by_field: BTreeMap<FieldKind, Vec<FieldCandidate>> = BTreeMap::new();
    for candidate in candidates {
        by_field.entry(candidate.field).or_default().push(candidate);
    }

    let mut fields = BTreeMap::new();
    for field in FieldKind::all() {
        let mut found = by_field.remove(&field).unwrap_or_default();
        found.sort_by(rank);
        let result = match found.into_iter().next() {
            None => {
                diagnostics.push(Diagnostic::NotDetected { field });
                FieldResult::not_detected()
            }
            Some(best) if best.confidence < config.floor(field) => {
                debug!(
                    "{}: best candidate {:.2} below floor {:.2}",
                    field.as_str(),
                    best.confidence,
                    config.floor(field)
                );
                diagnostics.push(Diagnostic::LowConfidence {
                    field,
                    confidence: best.confidence,
                    floor: config.floor(field),
                });
                FieldResult {
                    status: FieldStatus::LowConfidence,
                    candidate: Some(best),
                }
            }
            Some(best) => FieldResult {
                status: FieldStatus::Detected,
                candidate: Some(best),
            },
        };
        fields.insert(field, result);
    }

    let mut record = LabelRecord {
        fields,
        confidence: 0.0,
        diagnostics,
    };
    let failures = cross_check(&record);
    let mut confidence = aggregate(&record, config);
    for detail in failures {
        warn!("cross-field check failed: {}", detail);
        confidence *= config.cross_check_penalty;
        record.diagnostics.push(Diagnostic::CrossFieldMismatch { detail });
    }
    record.confidence = confidence;
    record
}

/// Σ w·c / Σ w over the mandatory fields; fields not detected contribute 0.
pub fn aggregate(record: &LabelRecord, config: &LabelConfig) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for field in FieldKind::MANDATORY {
        let weight = config.weight(field);
        total += weight;
        if let Some(candidate) = record.detected(field) {
            weighted += weight * candidate.confidence;
        }
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

/// Descriptions of every failed sanity check between detected fields.
pub fn cross_check(record: &LabelRecord) -> Vec<String> {
    let mut failures = Vec::new();
    let net = match record.detected_value(FieldKind::NetContent) {
        Some(FieldValue::Quantity(q)) => Some(q),
        _ => None,
    };
    let table = record.nutrition();

    if let (Some(net), Some(table)) = (net, table) {
        check_basis(net, table, &mut failures);
    }
    if let Some(table) = table {
        check_table(table, &mut failures);
    }
    if let Some(FieldValue::Dates(dates)) = record.detected_value(FieldKind::DateMarks) {
        if let (Some(produced), Some(expiry)) = (dates.production_date, dates.expiry_date) {
            if expiry < produced {
                failures.push(format!("expiry date {} precedes production date {}", expiry, produced));
            }
        }
    }
    failures
}

fn check_basis(net: &Quantity, table: &NutritionTable, failures: &mut Vec<String>) {
    let dimension = net.unit.dimension();
    match (dimension, table.basis) {
        (Dimension::Mass, Basis::Per100ml) | (Dimension::Volume, Basis::Per100g) => failures.push(format!(
            "net content {} does not match nutrition basis {:?}",
            net.display(),
            table.basis
        )),
        (Dimension::Mass, Basis::Per100g) | (Dimension::Volume, Basis::Per100ml)
            if !(net.base_amount() > 0.0 && (net.base_amount() / 100.0).log10().abs() <= MAX_BASIS_ORDERS) =>
        {
            failures.push(format!(
                "net content {} is out of scale with the per-100 nutrition basis",
                net.display()
            ))
        }
        (
            _,
            Basis::PerServing {
                size: Some(size),
                dimension: Some(serving),
            },
        ) if serving == dimension && size > net.base_amount() => failures.push(format!(
            "serving size {} exceeds net content {}",
            format_amount(size),
            net.display()
        )),
        _ => {}
    }
}

fn check_table(table: &NutritionTable, failures: &mut Vec<String>) {
    let per_100 = |nutrient| table.get(nutrient).and_then(|e| e.per_100());
    let macros: Vec<f64> = MACROS.iter().filter_map(|n| per_100(*n)).collect();
    if !macros.is_empty() {
        let sum: f64 = macros.iter().sum();
        if sum > MAX_MACROS_PER_100 {
            failures.push(format!("protein + fat + carbohydrate is {:.1} g per 100", sum));
        }
    }
    if let Some(energy) = per_100(NutrientKind::Energy) {
        if energy > MAX_ENERGY_PER_100 {
            failures.push(format!("energy {:.0} kJ per 100 is implausible", energy));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Method, NutrientEntry, QuantityUnit};

    fn config() -> LabelConfig {
        LabelConfig::builtin().unwrap()
    }

    fn text(field: FieldKind, value: &str, pos: usize, confidence: f64) -> FieldCandidate {
        FieldCandidate::new(field, FieldValue::Text(value.into()), vec![pos], confidence, Method::Anchored)
    }

    fn table(basis: Basis, amounts: &[(NutrientKind, f64)]) -> FieldCandidate {
        let entries = amounts
            .iter()
            .map(|&(nutrient, amount)| NutrientEntry {
                nutrient,
                amount,
                unit: nutrient.canonical_unit(),
                basis,
                declared_nrv: None,
                source_spans: Vec::new(),
            })
            .collect();
        let table = NutritionTable {
            entries,
            basis,
            ..Default::default()
        };
        FieldCandidate::new(FieldKind::Nutrition, FieldValue::Nutrition(table), vec![10], 0.9, Method::TableAligned)
    }

    fn net(amount: f64, unit: QuantityUnit, unit_text: &str) -> FieldCandidate {
        FieldCandidate::new(
            FieldKind::NetContent,
            FieldValue::Quantity(Quantity {
                amount,
                unit,
                unit_text: unit_text.into(),
            }),
            vec![5],
            0.9,
            Method::AnchoredPattern,
        )
    }

    fn mismatches(record: &LabelRecord) -> usize {
        record
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::CrossFieldMismatch { .. }))
            .count()
    }

    #[test]
    fn higher_confidence_wins() {
        let record = assemble(
            vec![
                text(FieldKind::Producer, "乙公司", 0, 0.6),
                text(FieldKind::Producer, "甲公司", 3, 0.9),
            ],
            Vec::new(),
            &config(),
        );
        assert_eq!(record.text(FieldKind::Producer), "甲公司");
    }

    #[test]
    fn ties_go_to_earlier_position() {
        let record = assemble(
            vec![
                text(FieldKind::Producer, "乙公司", 7, 0.8),
                text(FieldKind::Producer, "甲公司", 2, 0.8),
            ],
            Vec::new(),
            &config(),
        );
        assert_eq!(record.text(FieldKind::Producer), "甲公司");
    }

    #[test]
    fn below_floor_is_low_confidence() {
        let record = assemble(vec![text(FieldKind::Name, "面包", 0, 0.2)], Vec::new(), &config());
        assert_eq!(record.status(FieldKind::Name), FieldStatus::LowConfidence);
        assert_eq!(record.text(FieldKind::Name), "");
        assert!(record.diagnostics.contains(&Diagnostic::LowConfidence {
            field: FieldKind::Name,
            confidence: 0.2,
            floor: 0.3
        }));
        assert_eq!(record.confidence, 0.0);
    }

    #[test]
    fn aggregate_weights_mandatory_fields() {
        let config = config();
        let total: f64 = FieldKind::MANDATORY.iter().map(|f| config.weight(*f)).sum();
        let record = assemble(
            vec![
                text(FieldKind::Name, "全麦面包", 0, 0.9),
                text(FieldKind::Address, "某市某区", 1, 1.0),
            ],
            Vec::new(),
            &config,
        );
        let expected = config.weight(FieldKind::Name) * 0.9 / total;
        assert!((record.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn basis_mismatch_penalized() {
        let config = config();
        let candidates = vec![
            net(500.0, QuantityUnit::Milliliter, "ml"),
            table(Basis::Per100g, &[(NutrientKind::Energy, 180.0)]),
        ];
        let clean = assemble(
            vec![
                net(500.0, QuantityUnit::Milliliter, "ml"),
                table(Basis::Per100ml, &[(NutrientKind::Energy, 180.0)]),
            ],
            Vec::new(),
            &config,
        );
        let record = assemble(candidates, Vec::new(), &config);
        assert_eq!(mismatches(&clean), 0);
        assert_eq!(mismatches(&record), 1);
        assert!((record.confidence - clean.confidence * config.cross_check_penalty).abs() < 1e-9);
    }

    #[test]
    fn net_content_out_of_scale_with_basis() {
        let config = config();
        let energy = [(NutrientKind::Energy, 1450.0)];
        let huge = assemble(
            vec![net(5000.0, QuantityUnit::Kilogram, "kg"), table(Basis::Per100g, &energy)],
            Vec::new(),
            &config,
        );
        let tiny = assemble(
            vec![net(0.5, QuantityUnit::Gram, "g"), table(Basis::Per100g, &energy)],
            Vec::new(),
            &config,
        );
        let bag = assemble(
            vec![net(5.0, QuantityUnit::Kilogram, "kg"), table(Basis::Per100g, &energy)],
            Vec::new(),
            &config,
        );
        assert_eq!(mismatches(&huge), 1);
        assert_eq!(mismatches(&tiny), 1);
        assert_eq!(mismatches(&bag), 0);
        assert!(huge.confidence < bag.confidence);
    }

    #[test]
    fn serving_larger_than_package() {
        let basis = Basis::PerServing {
            size: Some(60.0),
            dimension: Some(Dimension::Mass),
        };
        let record = assemble(
            vec![net(50.0, QuantityUnit::Gram, "g"), table(basis, &[(NutrientKind::Protein, 3.0)])],
            Vec::new(),
            &config(),
        );
        assert_eq!(mismatches(&record), 1);
    }

    #[test]
    fn implausible_table_values() {
        let record = assemble(
            vec![table(
                Basis::Per100g,
                &[
                    (NutrientKind::Energy, 4200.0),
                    (NutrientKind::Protein, 50.0),
                    (NutrientKind::Fat, 40.0),
                    (NutrientKind::Carbohydrate, 30.0),
                ],
            )],
            Vec::new(),
            &config(),
        );
        assert_eq!(mismatches(&record), 2);
    }

    #[test]
    fn missing_fields_reported() {
        let record = assemble(Vec::new(), Vec::new(), &config());
        let missing = record
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::NotDetected { .. }))
            .count();
        assert_eq!(missing, FieldKind::all().count());
        assert_eq!(record.confidence, 0.0);
    }
}
