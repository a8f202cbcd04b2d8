use food_label_lib::types::{FieldValue, QuantityUnit};
use food_label_lib::{Diagnostic, FieldKind, FieldStatus, LabelEngine, LabelRecord, TextSpan};

const CONFIDENCE: f64 = 0.95;

fn engine() -> LabelEngine {
    LabelEngine::with_defaults().unwrap()
}

/// One span per cell; cells 120 px apart, rows 24 px apart, starting below a 60 px banner.
fn grid(rows: &[&[&str]]) -> Vec<TextSpan> {
    let mut spans = Vec::new();
    for (r, cells) in rows.iter().enumerate() {
        for (c, text) in cells.iter().enumerate() {
            spans.push(TextSpan::from_rect(
                *text,
                c as f64 * 120.0,
                60.0 + r as f64 * 24.0,
                100.0,
                16.0,
                CONFIDENCE,
            ));
        }
    }
    spans
}

const NUTRITION_ROWS: &[&[&str]] = &[
    &["营养成分表"],
    &["项目", "每100克", "NRV%"],
    &["能量", "1450kJ", "17%"],
    &["蛋白质", "8.2g", "14%"],
    &["脂肪", "5.0g", "8%"],
    &["碳水化合物", "70.0g", "23%"],
    &["钠", "400mg", "20%"],
];

const LABEL_ROWS: &[&[&str]] = &[
    &["配料:全麦粉,小麦粉,水,食用盐"],
    &["致敏物质提示:含有小麦"],
    &["净含量:4OO克"],
    &["生产商:某某食品有限公司"],
    &["地址:某省某市某路1号"],
    &["生产日期:2024-03-01", "保质期:6个月"],
    &["贮存条件:阴凉干燥处"],
    &["食品生产许可证编号:SC10644011500123"],
    &["产品标准代号:GB/T 20981"],
];

fn full_label() -> Vec<TextSpan> {
    let rows: Vec<&[&str]> = LABEL_ROWS.iter().chain(NUTRITION_ROWS).copied().collect();
    let mut spans = vec![TextSpan::from_rect("全麦面包", 0.0, 0.0, 200.0, 48.0, 0.97)];
    spans.extend(grid(&rows));
    spans
}

#[test]
fn zero_spans_give_empty_record() {
    let record = engine().extract(&[]);
    for field in FieldKind::MANDATORY {
        assert_eq!(record.status(field), FieldStatus::NotDetected);
    }
    assert_eq!(record.confidence, 0.0);
    assert_eq!(record, LabelRecord::empty());
}

#[test]
fn ingredient_list_is_joined_and_repeatable() {
    let spans = vec![
        TextSpan::from_rect("配料", 0.0, 0.0, 40.0, 14.0, 0.9),
        TextSpan::from_rect("全麦粉, 小麦粉, 水", 50.0, 0.0, 160.0, 14.0, 0.9),
    ];
    let engine = engine();
    let first = engine.extract(&spans);
    let second = engine.extract(&spans);
    assert_eq!(first.text(FieldKind::Ingredients), "全麦粉、小麦粉、水");
    assert_eq!(first, second);
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
}

#[test]
fn energy_nrv_percentage() {
    let record = engine().extract(&grid(NUTRITION_ROWS));
    let table = record.nutrition().expect("nutrition table");
    assert_eq!(table.get(food_label_lib::NutrientKind::Energy).unwrap().amount, 1450.0);
    assert_eq!(table.nrv_for(food_label_lib::NutrientKind::Energy), Some(17));
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["nutrition"]["energy"], "1450kJ");
    assert_eq!(json["nutrition"]["energyNRV"], "17%");
    assert_eq!(json["nutrition"]["sodiumNRV"], "20%");
    assert!(json["nutrition"].get("sugar").is_none());
}

#[test]
fn net_content_digits_corrected() {
    let record = engine().extract(&grid(&[&["净含量:4OO克"]]));
    match record.detected_value(FieldKind::NetContent) {
        Some(FieldValue::Quantity(q)) => {
            assert_eq!(q.amount, 400.0);
            assert_eq!(q.unit, QuantityUnit::Gram);
        }
        other => panic!("unexpected net content {:?}", other),
    }
}

#[test]
fn producer_by_confidence_then_reading_order() {
    let spans = vec![
        TextSpan::from_rect("生产商:乙食品有限公司", 0.0, 0.0, 200.0, 14.0, 0.6),
        TextSpan::from_rect("生产商:甲食品有限公司", 0.0, 30.0, 200.0, 14.0, 0.9),
    ];
    assert_eq!(engine().extract(&spans).text(FieldKind::Producer), "甲食品有限公司");

    let tied = vec![
        TextSpan::from_rect("生产商:乙食品有限公司", 0.0, 0.0, 200.0, 14.0, 0.8),
        TextSpan::from_rect("生产商:甲食品有限公司", 0.0, 30.0, 200.0, 14.0, 0.8),
    ];
    assert_eq!(engine().extract(&tied).text(FieldKind::Producer), "乙食品有限公司");
}

#[test]
fn rows_without_header_leave_nutrition_undetected() {
    const BASE_ROWS: &[&[&str]] = &[&["配料:小麦粉,水"], &["净含量:400g"]];
    let headed: Vec<&[&str]> = BASE_ROWS.iter().chain(NUTRITION_ROWS).copied().collect();
    let headless: Vec<&[&str]> = BASE_ROWS.iter().chain(&NUTRITION_ROWS[2..]).copied().collect();

    let with_header = engine().extract(&grid(&headed));
    let without_header = engine().extract(&grid(&headless));

    assert_eq!(with_header.status(FieldKind::Nutrition), FieldStatus::Detected);
    assert_eq!(without_header.status(FieldKind::Nutrition), FieldStatus::NotDetected);
    assert!(without_header
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::StructuralAmbiguity { .. })));
    assert!(without_header.confidence < with_header.confidence);
}

#[test]
fn complete_label() {
    let record = engine().extract(&full_label());
    assert_eq!(record.text(FieldKind::Name), "全麦面包");
    assert_eq!(record.text(FieldKind::Ingredients), "全麦粉、小麦粉、水、食用盐");
    assert_eq!(record.text(FieldKind::NetContent), "400克");
    assert_eq!(record.text(FieldKind::Producer), "某某食品有限公司");
    assert_eq!(record.text(FieldKind::LicenseNumber), "SC10644011500123");
    assert_eq!(record.text(FieldKind::StandardCode), "GB/T 20981");
    assert_eq!(record.text(FieldKind::Address), "某省某市某路1号");

    let dates = record.date_marks().expect("date marks");
    assert_eq!(dates.production_date.map(|d| d.to_string()).as_deref(), Some("2024-03-01"));
    assert_eq!(dates.expiry_date.map(|d| d.to_string()).as_deref(), Some("2024-09-01"));
    assert!(dates.expiry_derived);

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["shelfLife"], "6个月");
    assert_eq!(json["foodProductionLicenseNumber"], "SC10644011500123");
    assert_eq!(json["irradiated"], "");
    assert_eq!(json["nutrition"]["proteinNRV"], "14%");
    assert!(record.confidence > 0.5 && record.confidence < 1.0);
    assert!(!record
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::CrossFieldMismatch { .. } | Diagnostic::NrvMismatch { .. })));
}

#[test]
fn paddleocr_json_input() {
    let json = r#"[
        [[[0, 0], [120, 0], [120, 16], [0, 16]], ["食品名称:苏打饼干", 0.96]],
        [[[0, 24], [120, 24], [120, 40], [0, 40]], ["净含量:500g", 0.93]],
        [[[0, 48], [120, 48], [120, 64], [0, 64]], ["噪声", 0.05]]
    ]"#;
    let record = engine().extract_json(json).unwrap();
    assert_eq!(record.text(FieldKind::Name), "苏打饼干");
    assert_eq!(record.text(FieldKind::NetContent), "500g");
}

#[test]
fn litre_content_and_embedded_allergen_phrase() {
    let rows: &[&[&str]] = &[&["配料:"], &["水,白砂糖,植物油(含有大豆)"], &["净含量:1.5l"]];
    let record = engine().extract(&grid(rows));
    assert_eq!(record.text(FieldKind::Ingredients), "水、白砂糖、植物油(含有大豆)");
    match record.detected_value(FieldKind::NetContent) {
        Some(FieldValue::Quantity(q)) => {
            assert_eq!(q.amount, 1.5);
            assert_eq!(q.unit, QuantityUnit::Liter);
        }
        other => panic!("unexpected net content {:?}", other),
    }
}
