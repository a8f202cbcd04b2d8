use crate::error::Diagnostic;
use crate::types::{DateMarks, FieldCandidate, FieldKind, FieldValue, NutritionTable};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Detected,
    /// Best candidate sat below the field's floor; kept for diagnostics, never output.
    LowConfidence,
    NotDetected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldResult {
    pub status: FieldStatus,
    pub candidate: Option<FieldCandidate>,
}

impl FieldResult {
    pub fn not_detected() -> Self {
        Self {
            status: FieldStatus::NotDetected,
            candidate: None,
        }
    }
}

/// Outcome of one extraction run.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRecord {
    pub fields: BTreeMap<FieldKind, FieldResult>,
    /// Weighted mean over the mandatory fields, after cross-check penalties.
    pub confidence: f64,
    pub diagnostics: Vec<Diagnostic>,
}

impl LabelRecord {
    /// Every field absent, confidence 0.
    pub fn empty() -> Self {
        Self {
            fields: FieldKind::all().map(|f| (f, FieldResult::not_detected())).collect(),
            confidence: 0.0,
            diagnostics: Vec::new(),
        }
    }

    /// Empty record explaining why the input was rejected.
    pub fn rejected(detail: impl Into<String>) -> Self {
        let mut record = Self::empty();
        record.diagnostics.push(Diagnostic::MalformedInput { detail: detail.into() });
        record
    }

    pub fn status(&self, field: FieldKind) -> FieldStatus {
        self.fields
            .get(&field)
            .map_or(FieldStatus::NotDetected, |r| r.status)
    }

    /// The winning candidate, only when it cleared the field's floor.
    pub fn detected(&self, field: FieldKind) -> Option<&FieldCandidate> {
        self.fields
            .get(&field)
            .filter(|r| r.status == FieldStatus::Detected)
            .and_then(|r| r.candidate.as_ref())
    }

    pub fn detected_value(&self, field: FieldKind) -> Option<&FieldValue> {
        self.detected(field).map(|c| &c.value)
    }

    /// Display text of a detected field, empty when absent.
    pub fn text(&self, field: FieldKind) -> String {
        self.detected_value(field).map(FieldValue::display).unwrap_or_default()
    }

    pub fn nutrition(&self) -> Option<&NutritionTable> {
        match self.detected_value(FieldKind::Nutrition) {
            Some(FieldValue::Nutrition(table)) => Some(table),
            _ => None,
        }
    }

    pub fn date_marks(&self) -> Option<&DateMarks> {
        match self.detected_value(FieldKind::DateMarks) {
            Some(FieldValue::Dates(dates)) => Some(dates),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelJson<'a> {
    name: String,
    ingredients: String,
    net_content: String,
    producer: String,
    nutrition: NutritionJson<'a>,
    production_date: String,
    expiry_date: String,
    shelf_life: String,
    storage_conditions: String,
    food_production_license_number: String,
    product_standard_code: String,
    quality_grade: String,
    allergens: String,
    warning: String,
    irradiated: String,
    specification: String,
    address: String,
    contact_info: String,
    commodity_barcode: String,
    confidence: f64,
}

/// Nutrient amounts as printed ("1450kJ") followed by the computed "<key>NRV" percentages.
struct NutritionJson<'a>(Option<&'a NutritionTable>);

impl Serialize for NutritionJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(table) = self.0 {
            for entry in &table.entries {
                map.serialize_entry(entry.nutrient.json_key(), &entry.display())?;
            }
            for nrv in &table.nrv {
                map.serialize_entry(&format!("{}NRV", nrv.nutrient.json_key()), &format!("{}%", nrv.percent))?;
            }
        }
        map.end()
    }
}

impl Serialize for LabelRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let dates = self.date_marks();
        let production_date = dates
            .and_then(|d| {
                d.production_date
                    .map(|date| date.format("%Y-%m-%d").to_string())
                    .or_else(|| d.production_note.clone())
            })
            .unwrap_or_default();
        let expiry_date = dates
            .and_then(|d| d.expiry_date)
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let shelf_life = dates
            .and_then(|d| d.shelf_life.as_ref())
            .map(|s| s.display())
            .unwrap_or_default();

        LabelJson {
            name: self.text(FieldKind::Name),
            ingredients: self.text(FieldKind::Ingredients),
            net_content: self.text(FieldKind::NetContent),
            producer: self.text(FieldKind::Producer),
            nutrition: NutritionJson(self.nutrition()),
            production_date,
            expiry_date,
            shelf_life,
            storage_conditions: self.text(FieldKind::StorageConditions),
            food_production_license_number: self.text(FieldKind::LicenseNumber),
            product_standard_code: self.text(FieldKind::StandardCode),
            quality_grade: self.text(FieldKind::QualityGrade),
            allergens: self.text(FieldKind::Allergens),
            warning: self.text(FieldKind::Warnings),
            irradiated: self.text(FieldKind::Irradiation),
            specification: self.text(FieldKind::Specification),
            address: self.text(FieldKind::Address),
            contact_info: self.text(FieldKind::ContactInfo),
            commodity_barcode: self.text(FieldKind::CommodityBarcode),
            confidence: self.confidence,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Basis, Method, NrvResult, NutrientEntry, NutrientKind, NutrientUnit};

    fn with(record: &mut LabelRecord, candidate: FieldCandidate) {
        record.fields.insert(
            candidate.field,
            FieldResult {
                status: FieldStatus::Detected,
                candidate: Some(candidate),
            },
        );
    }

    #[test]
    fn empty_record_serializes_blank_fields() {
        let record = LabelRecord::empty();
        let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "");
        assert_eq!(json["foodProductionLicenseNumber"], "");
        assert_eq!(json["nutrition"], serde_json::json!({}));
        assert_eq!(json["confidence"], 0.0);
        assert_eq!(record.status(FieldKind::Irradiation), FieldStatus::NotDetected);
    }

    #[test]
    fn nutrition_keys() {
        let mut record = LabelRecord::empty();
        let table = NutritionTable {
            entries: vec![NutrientEntry {
                nutrient: NutrientKind::Energy,
                amount: 1450.0,
                unit: NutrientUnit::KiloJoule,
                basis: Basis::Per100g,
                declared_nrv: Some(17),
                source_spans: vec![3],
            }],
            nrv: vec![NrvResult {
                nutrient: NutrientKind::Energy,
                percent: 17,
            }],
            ..Default::default()
        };
        with(
            &mut record,
            FieldCandidate::new(FieldKind::Nutrition, FieldValue::Nutrition(table), vec![3], 0.9, Method::TableAligned),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["nutrition"]["energy"], "1450kJ");
        assert_eq!(json["nutrition"]["energyNRV"], "17%");
        assert!(json["nutrition"].get("protein").is_none());
    }

    #[test]
    fn low_confidence_is_hidden() {
        let mut record = LabelRecord::empty();
        record.fields.insert(
            FieldKind::Name,
            FieldResult {
                status: FieldStatus::LowConfidence,
                candidate: Some(FieldCandidate::new(
                    FieldKind::Name,
                    FieldValue::Text("面包".into()),
                    vec![0],
                    0.1,
                    Method::Heuristic,
                )),
            },
        );
        assert_eq!(record.text(FieldKind::Name), "");
        assert!(record.detected(FieldKind::Name).is_none());
    }

    #[test]
    fn rejected_record_explains() {
        let record = LabelRecord::rejected("span #2 has no polygon");
        assert_eq!(record.diagnostics.len(), 1);
        assert_eq!(record.confidence, 0.0);
    }
}
