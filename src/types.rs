use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One recognized line from an OCR engine that reports no geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounds of a span polygon.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn from_polygon(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox {
            x_min: first.x,
            y_min: first.y,
            x_max: first.x,
            y_max: first.y,
        };
        for p in &points[1..] {
            bbox.x_min = bbox.x_min.min(p.x);
            bbox.y_min = bbox.y_min.min(p.y);
            bbox.x_max = bbox.x_max.max(p.x);
            bbox.y_max = bbox.y_max.max(p.y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// Length of the shared vertical extent (0 when disjoint).
    pub fn vertical_overlap(&self, other: &BoundingBox) -> f64 {
        (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0)
    }

    /// Length of the shared horizontal extent (0 when disjoint).
    pub fn horizontal_overlap(&self, other: &BoundingBox) -> f64 {
        (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0)
    }
}

/// A single OCR-recognized fragment. `text` holds the normalized form and equals
/// `raw_text` until the span has passed through the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub raw_text: String,
    pub text: String,
    pub polygon: Vec<Point>,
    pub confidence: f64,
}

impl TextSpan {
    pub fn new(raw_text: impl Into<String>, polygon: Vec<Point>, confidence: f64) -> Self {
        let raw_text = raw_text.into();
        Self {
            text: raw_text.clone(),
            raw_text,
            polygon,
            confidence,
        }
    }

    /// Span with a rectangular polygon at (x, y) of size w × h.
    pub fn from_rect(raw_text: impl Into<String>, x: f64, y: f64, w: f64, h: f64, confidence: f64) -> Self {
        Self::new(
            raw_text,
            vec![
                Point::new(x, y),
                Point::new(x + w, y),
                Point::new(x + w, y + h),
                Point::new(x, y + h),
            ],
            confidence,
        )
    }

    pub fn with_text(&self, text: String) -> Self {
        Self {
            raw_text: self.raw_text.clone(),
            text,
            polygon: self.polygon.clone(),
            confidence: self.confidence,
        }
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::from_polygon(&self.polygon).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Name,
    Ingredients,
    NetContent,
    Producer,
    DateMarks,
    StorageConditions,
    LicenseNumber,
    StandardCode,
    QualityGrade,
    Allergens,
    Nutrition,
    Warnings,
    Irradiation,
    Specification,
    Address,
    ContactInfo,
    CommodityBarcode,
}

impl FieldKind {
    /// The 13 elements GB 7718 requires on a prepackaged food label.
    pub const MANDATORY: [FieldKind; 13] = [
        FieldKind::Name,
        FieldKind::Ingredients,
        FieldKind::NetContent,
        FieldKind::Producer,
        FieldKind::DateMarks,
        FieldKind::StorageConditions,
        FieldKind::LicenseNumber,
        FieldKind::StandardCode,
        FieldKind::QualityGrade,
        FieldKind::Allergens,
        FieldKind::Nutrition,
        FieldKind::Warnings,
        FieldKind::Irradiation,
    ];

    pub const SUPPLEMENTARY: [FieldKind; 4] = [
        FieldKind::Specification,
        FieldKind::Address,
        FieldKind::ContactInfo,
        FieldKind::CommodityBarcode,
    ];

    pub fn all() -> impl Iterator<Item = FieldKind> {
        Self::MANDATORY.into_iter().chain(Self::SUPPLEMENTARY)
    }

    pub fn is_mandatory(self) -> bool {
        Self::MANDATORY.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Name => "name",
            FieldKind::Ingredients => "ingredients",
            FieldKind::NetContent => "net_content",
            FieldKind::Producer => "producer",
            FieldKind::DateMarks => "date_marks",
            FieldKind::StorageConditions => "storage_conditions",
            FieldKind::LicenseNumber => "license_number",
            FieldKind::StandardCode => "standard_code",
            FieldKind::QualityGrade => "quality_grade",
            FieldKind::Allergens => "allergens",
            FieldKind::Nutrition => "nutrition",
            FieldKind::Warnings => "warnings",
            FieldKind::Irradiation => "irradiation",
            FieldKind::Specification => "specification",
            FieldKind::Address => "address",
            FieldKind::ContactInfo => "contact_info",
            FieldKind::CommodityBarcode => "commodity_barcode",
        }
    }
}

/// How a candidate was found. Kept for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Value follows a field keyword.
    Anchored,
    /// Value matched a field pattern next to a field keyword.
    AnchoredPattern,
    /// Value matched a field pattern with no keyword nearby.
    Pattern,
    /// Layout or vocabulary heuristic.
    Heuristic,
    /// Built from other fields.
    Derived,
    /// Nutrition rows aligned with header columns.
    TableAligned,
    /// Nutrition rows paired label→value in reading order.
    TableSequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Mass,
    Volume,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityUnit {
    Gram,
    Kilogram,
    Milliliter,
    Liter,
    Portion,
}

impl QuantityUnit {
    pub fn parse(unit: &str) -> Option<Self> {
        match unit.to_ascii_lowercase().as_str() {
            "g" | "克" => Some(QuantityUnit::Gram),
            "kg" | "千克" | "公斤" => Some(QuantityUnit::Kilogram),
            "ml" | "毫升" => Some(QuantityUnit::Milliliter),
            "l" | "升" => Some(QuantityUnit::Liter),
            "份" => Some(QuantityUnit::Portion),
            _ => None,
        }
    }

    pub fn dimension(self) -> Dimension {
        match self {
            QuantityUnit::Gram | QuantityUnit::Kilogram => Dimension::Mass,
            QuantityUnit::Milliliter | QuantityUnit::Liter => Dimension::Volume,
            QuantityUnit::Portion => Dimension::Count,
        }
    }

    /// Amount in grams, millilitres or portions.
    pub fn to_base(self, amount: f64) -> f64 {
        match self {
            QuantityUnit::Kilogram | QuantityUnit::Liter => amount * 1000.0,
            _ => amount,
        }
    }
}

/// Net content or specification amount. `unit_text` keeps the unit as printed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quantity {
    pub amount: f64,
    pub unit: QuantityUnit,
    pub unit_text: String,
}

impl Quantity {
    pub fn base_amount(&self) -> f64 {
        self.unit.to_base(self.amount)
    }

    pub fn display(&self) -> String {
        format!("{}{}", format_amount(self.amount), self.unit_text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShelfLife {
    pub amount: u32,
    pub unit: DurationUnit,
}

impl ShelfLife {
    pub fn display(&self) -> String {
        let unit = match self.unit {
            DurationUnit::Day => "天",
            DurationUnit::Week => "周",
            DurationUnit::Month => "个月",
            DurationUnit::Year => "年",
        };
        format!("{}{}", self.amount, unit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DateMarks {
    pub production_date: Option<NaiveDate>,
    /// Printed pointer such as "见包装" when the date is stamped elsewhere.
    pub production_note: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// True when `expiry_date` was computed from production date + shelf life.
    pub expiry_derived: bool,
    pub shelf_life: Option<ShelfLife>,
}

impl DateMarks {
    pub fn has_end(&self) -> bool {
        self.expiry_date.is_some() || self.shelf_life.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.production_date.is_none()
            && self.production_note.is_none()
            && self.expiry_date.is_none()
            && self.shelf_life.is_none()
    }

    pub fn display(&self) -> String {
        let mut parts = Vec::new();
        if let Some(date) = self.production_date {
            parts.push(format!("生产日期 {}", date.format("%Y-%m-%d")));
        } else if let Some(note) = &self.production_note {
            parts.push(format!("生产日期 {}", note));
        }
        if let Some(life) = &self.shelf_life {
            parts.push(format!("保质期 {}", life.display()));
        }
        if let Some(date) = self.expiry_date {
            parts.push(format!("保质期至 {}", date.format("%Y-%m-%d")));
        }
        parts.join("; ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NutrientKind {
    Energy,
    Protein,
    Fat,
    SaturatedFat,
    TransFat,
    Carbohydrate,
    Sugar,
    DietaryFiber,
    Sodium,
    Cholesterol,
    Calcium,
}

impl NutrientKind {
    pub fn canonical_unit(self) -> NutrientUnit {
        match self {
            NutrientKind::Energy => NutrientUnit::KiloJoule,
            NutrientKind::Sodium | NutrientKind::Cholesterol | NutrientKind::Calcium => {
                NutrientUnit::Milligram
            }
            _ => NutrientUnit::Gram,
        }
    }

    /// Key used in the JSON nutrition object.
    pub fn json_key(self) -> &'static str {
        match self {
            NutrientKind::Energy => "energy",
            NutrientKind::Protein => "protein",
            NutrientKind::Fat => "fat",
            NutrientKind::SaturatedFat => "saturatedFat",
            NutrientKind::TransFat => "transFat",
            NutrientKind::Carbohydrate => "carbohydrate",
            NutrientKind::Sugar => "sugar",
            NutrientKind::DietaryFiber => "dietaryFiber",
            NutrientKind::Sodium => "sodium",
            NutrientKind::Cholesterol => "cholesterol",
            NutrientKind::Calcium => "calcium",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NutrientUnit {
    #[serde(rename = "kJ")]
    KiloJoule,
    #[serde(rename = "g")]
    Gram,
    #[serde(rename = "mg")]
    Milligram,
}

impl NutrientUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            NutrientUnit::KiloJoule => "kJ",
            NutrientUnit::Gram => "g",
            NutrientUnit::Milligram => "mg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Basis {
    #[default]
    Per100g,
    Per100ml,
    /// Amounts per serving; serving size in g or ml when printed.
    PerServing { size: Option<f64>, dimension: Option<Dimension> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NutrientEntry {
    pub nutrient: NutrientKind,
    /// Amount in the nutrient's canonical unit.
    pub amount: f64,
    pub unit: NutrientUnit,
    pub basis: Basis,
    /// NRV% as printed on the label, when a column for it was found.
    pub declared_nrv: Option<u32>,
    pub source_spans: Vec<usize>,
}

impl NutrientEntry {
    pub fn display(&self) -> String {
        format!("{}{}", format_amount(self.amount), self.unit.symbol())
    }

    /// Amount per 100 g/ml, when the basis allows converting.
    pub fn per_100(&self) -> Option<f64> {
        match self.basis {
            Basis::Per100g | Basis::Per100ml => Some(self.amount),
            Basis::PerServing { size: Some(size), .. } if size > 0.0 => Some(self.amount / size * 100.0),
            Basis::PerServing { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NrvResult {
    pub nutrient: NutrientKind,
    pub percent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    /// Header names nutrients across columns, values in the rows below.
    Horizontal,
    /// Title/column header above one row per nutrient.
    Titled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NutritionTable {
    pub entries: Vec<NutrientEntry>,
    pub nrv: Vec<NrvResult>,
    pub basis: Basis,
    pub layout: Option<TableLayout>,
}

impl NutritionTable {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, nutrient: NutrientKind) -> Option<&NutrientEntry> {
        self.entries.iter().find(|e| e.nutrient == nutrient)
    }

    pub fn nrv_for(&self, nutrient: NutrientKind) -> Option<u32> {
        self.nrv.iter().find(|r| r.nutrient == nutrient).map(|r| r.percent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Quantity(Quantity),
    Dates(DateMarks),
    Nutrition(NutritionTable),
}

impl FieldValue {
    pub fn display(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Quantity(q) => q.display(),
            FieldValue::Dates(d) => d.display(),
            FieldValue::Nutrition(t) => t
                .entries
                .iter()
                .map(|e| format!("{} {}", e.nutrient.json_key(), e.display()))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// A provisional value for one field. `source_spans` are reading-order positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCandidate {
    pub field: FieldKind,
    pub value: FieldValue,
    pub source_spans: Vec<usize>,
    pub confidence: f64,
    pub method: Method,
}

impl FieldCandidate {
    pub fn new(field: FieldKind, value: FieldValue, mut source_spans: Vec<usize>, confidence: f64, method: Method) -> Self {
        source_spans.sort_unstable();
        source_spans.dedup();
        Self {
            field,
            value,
            source_spans,
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }
    }

    /// Earliest reading-order position this candidate was read from.
    pub fn position(&self) -> usize {
        self.source_spans.first().copied().unwrap_or(usize::MAX)
    }
}

/// Format an amount the way labels print it: integers bare, otherwise up to two decimals.
pub fn format_amount(amount: f64) -> String {
    if (amount - amount.round()).abs() < 1e-9 {
        format!("{}", amount.round() as i64)
    } else {
        let s = format!("{:.2}", amount);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_from_polygon() {
        let span = TextSpan::from_rect("a", 10.0, 20.0, 30.0, 10.0, 0.9);
        let b = span.bbox();
        assert_eq!(b.x_min, 10.0);
        assert_eq!(b.y_max, 30.0);
        assert_eq!(b.center(), Point::new(25.0, 25.0));
    }

    #[test]
    fn overlap_of_disjoint_boxes_is_zero() {
        let a = TextSpan::from_rect("a", 0.0, 0.0, 10.0, 10.0, 1.0).bbox();
        let b = TextSpan::from_rect("b", 0.0, 20.0, 10.0, 10.0, 1.0).bbox();
        assert_eq!(a.vertical_overlap(&b), 0.0);
        assert_eq!(a.horizontal_overlap(&b), 10.0);
    }

    #[test]
    fn amounts_print_like_labels() {
        assert_eq!(format_amount(400.0), "400");
        assert_eq!(format_amount(8.2), "8.2");
        assert_eq!(format_amount(418.4), "418.4");
        assert_eq!(format_amount(0.126), "0.13");
    }

    #[test]
    fn quantity_base_amount() {
        let q = Quantity {
            amount: 1.5,
            unit: QuantityUnit::Kilogram,
            unit_text: "kg".into(),
        };
        assert_eq!(q.base_amount(), 1500.0);
        assert_eq!(q.display(), "1.5kg");
    }

    #[test]
    fn candidate_positions_sorted() {
        let c = FieldCandidate::new(
            FieldKind::Name,
            FieldValue::Text("x".into()),
            vec![4, 2, 4],
            1.3,
            Method::Heuristic,
        );
        assert_eq!(c.source_spans, vec![2, 4]);
        assert_eq!(c.position(), 2);
        assert_eq!(c.confidence, 1.0);
    }
}
