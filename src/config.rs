//! Label tables configuration
//!
//! Keyword vocabularies, OCR substitution tables, NRV references, per-field
//! confidence floors and weights. Loaded once from TOML (embedded defaults or an
//! edited copy on disk) and passed by reference into every extraction run.

use crate::error::ConfigError;
use crate::types::{FieldKind, NutrientKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Tables shipped with the crate.
pub const DEFAULT_TABLES: &str = include_str!("../assets/label_tables.toml");

/// Environment variable naming a TOML file that replaces the embedded tables.
pub const TABLES_ENV: &str = "FOOD_LABEL_TABLES";

#[derive(Debug, Clone, Deserialize)]
pub struct LabelConfig {
    pub min_span_confidence: f64,
    pub row_overlap_ratio: f64,
    pub neighbor_radius: f64,
    pub name_top_fraction: f64,
    pub max_continuation_gap: f64,
    pub cross_check_penalty: f64,
    #[serde(default)]
    pub producer_markers: Vec<String>,
    #[serde(default)]
    pub text_substitutions: Vec<Substitution>,
    pub numeric_confusions: NumericConfusions,
    pub fields: BTreeMap<FieldKind, FieldRules>,
    pub dates: DateVocabulary,
    pub nutrition: NutritionVocabulary,
    pub nrv: BTreeMap<NutrientKind, f64>,
    pub allergens: AllergenVocabulary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Substitution {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NumericConfusions {
    /// Applied inside any run of digit-like characters that holds a real digit.
    pub run: CharMap,
    /// Applied only when both neighbours are digits.
    pub between_digits: CharMap,
}

/// Single-character substitution table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>")]
pub struct CharMap(BTreeMap<char, char>);

impl CharMap {
    pub fn get(&self, c: char) -> Option<char> {
        self.0.get(&c).copied()
    }

    pub fn contains(&self, c: char) -> bool {
        self.0.contains_key(&c)
    }
}

impl TryFrom<BTreeMap<String, String>> for CharMap {
    type Error = String;

    fn try_from(raw: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let mut map = BTreeMap::new();
        for (from, to) in raw {
            let (Some(f), Some(t)) = (single_char(&from), single_char(&to)) else {
                return Err(format!("confusion '{}' -> '{}' must map one character to one character", from, to));
            };
            map.insert(f, t);
        }
        Ok(CharMap(map))
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

/// Per-field extraction rules.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldRules {
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Keyword counts as an anchor anywhere in a span, not only as a leading label.
    #[serde(default)]
    pub anywhere: bool,
    /// Value keeps collecting following spans even after an inline value.
    #[serde(default)]
    pub block: bool,
    #[serde(default = "default_max_spans")]
    pub max_spans: usize,
    pub floor: f64,
    #[serde(default)]
    pub weight: f64,
}

fn default_max_spans() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct DateVocabulary {
    pub production: Vec<String>,
    pub expiry: Vec<String>,
    pub shelf_life: Vec<String>,
    #[serde(default)]
    pub see_package: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NutritionVocabulary {
    pub titles: Vec<String>,
    pub columns: Vec<String>,
    pub amount_columns: Vec<String>,
    pub nrv_columns: Vec<String>,
    pub max_rows: usize,
    pub nutrients: Vec<NutrientAliases>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NutrientAliases {
    pub kind: NutrientKind,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllergenVocabulary {
    pub terms: Vec<String>,
}

impl LabelConfig {
    /// Parse the embedded tables.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULT_TABLES)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: LabelConfig = toml::from_str(content)?;
        config.prepare();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded label tables from {:?}", path);
        Ok(config)
    }

    /// Tables named by `FOOD_LABEL_TABLES` (read from the process environment or a
    /// `.env` file), falling back to the embedded tables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        match std::env::var(TABLES_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_path(Path::new(path.trim())),
            _ => {
                debug!("{} not set, using embedded label tables", TABLES_ENV);
                Self::builtin()
            }
        }
    }

    pub fn rules(&self, field: FieldKind) -> Option<&FieldRules> {
        self.fields.get(&field)
    }

    pub fn floor(&self, field: FieldKind) -> f64 {
        self.rules(field).map(|r| r.floor).unwrap_or(1.0)
    }

    pub fn weight(&self, field: FieldKind) -> f64 {
        self.rules(field).map(|r| r.weight).unwrap_or(0.0)
    }

    pub fn reference_value(&self, nutrient: NutrientKind) -> Option<f64> {
        self.nrv.get(&nutrient).copied()
    }

    /// Lower-case ASCII keywords, sort longest first, and fill the anchor vocabularies
    /// of date marks and nutrition from their dedicated sections.
    fn prepare(&mut self) {
        let date_keywords: Vec<String> = self
            .dates
            .production
            .iter()
            .chain(&self.dates.expiry)
            .chain(&self.dates.shelf_life)
            .cloned()
            .collect();
        let title_keywords = self.nutrition.titles.clone();
        if let Some(rules) = self.fields.get_mut(&FieldKind::DateMarks) {
            if rules.keywords.is_empty() {
                rules.keywords = date_keywords;
            }
        }
        if let Some(rules) = self.fields.get_mut(&FieldKind::Nutrition) {
            if rules.keywords.is_empty() {
                rules.keywords = title_keywords;
            }
        }

        for rules in self.fields.values_mut() {
            prepare_keywords(&mut rules.keywords);
        }
        prepare_keywords(&mut self.dates.production);
        prepare_keywords(&mut self.dates.expiry);
        prepare_keywords(&mut self.dates.shelf_life);
        prepare_keywords(&mut self.dates.see_package);
        prepare_keywords(&mut self.nutrition.titles);
        prepare_keywords(&mut self.nutrition.columns);
        prepare_keywords(&mut self.nutrition.amount_columns);
        prepare_keywords(&mut self.nutrition.nrv_columns);
        for nutrient in &mut self.nutrition.nutrients {
            prepare_keywords(&mut nutrient.aliases);
        }
        prepare_keywords(&mut self.producer_markers);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be within [0, 1], got {}", name, v)))
            }
        };
        unit("min_span_confidence", self.min_span_confidence)?;
        unit("name_top_fraction", self.name_top_fraction)?;
        unit("cross_check_penalty", self.cross_check_penalty)?;
        if !(self.row_overlap_ratio > 0.0 && self.row_overlap_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "row_overlap_ratio must be within (0, 1], got {}",
                self.row_overlap_ratio
            )));
        }
        if !(self.neighbor_radius > 0.0) || !(self.max_continuation_gap > 0.0) {
            return Err(ConfigError::Invalid(
                "neighbor_radius and max_continuation_gap must be positive".to_string(),
            ));
        }
        for field in FieldKind::all() {
            let rules = self
                .rules(field)
                .ok_or_else(|| ConfigError::Invalid(format!("missing rules for field '{}'", field.as_str())))?;
            unit(&format!("fields.{}.floor", field.as_str()), rules.floor)?;
            if !(rules.weight >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "fields.{}.weight must not be negative",
                    field.as_str()
                )));
            }
        }
        if !FieldKind::all().any(|f| f.is_mandatory() && self.weight(f) > 0.0) {
            return Err(ConfigError::Invalid("at least one mandatory field needs a weight".to_string()));
        }
        for (nutrient, reference) in &self.nrv {
            if !(*reference > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "nrv reference for {:?} must be positive, got {}",
                    nutrient, reference
                )));
            }
        }
        if self.nutrition.nutrients.is_empty() {
            return Err(ConfigError::Invalid("nutrition.nutrients is empty".to_string()));
        }
        Ok(())
    }
}

fn prepare_keywords(keywords: &mut Vec<String>) {
    for k in keywords.iter_mut() {
        *k = k.trim().to_ascii_lowercase();
    }
    keywords.retain(|k| !k.is_empty());
    keywords.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b)));
    keywords.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_tables_load() {
        let config = LabelConfig::builtin().unwrap();
        assert!((config.min_span_confidence - 0.1).abs() < 1e-9);
        assert_eq!(config.reference_value(NutrientKind::Energy), Some(8400.0));
        assert_eq!(config.reference_value(NutrientKind::Sodium), Some(2000.0));
        assert_eq!(config.reference_value(NutrientKind::Sugar), None);
        for field in FieldKind::all() {
            assert!(config.rules(field).is_some(), "missing {:?}", field);
        }
    }

    #[test]
    fn test_keywords_sorted_longest_first() {
        let config = LabelConfig::builtin().unwrap();
        let ingredients = &config.rules(FieldKind::Ingredients).unwrap().keywords;
        assert_eq!(ingredients[0], "ingredients");
        let pos_table = ingredients.iter().position(|k| k == "配料表").unwrap();
        let pos_plain = ingredients.iter().position(|k| k == "配料").unwrap();
        assert!(pos_table < pos_plain);
    }

    #[test]
    fn test_date_and_nutrition_anchors_filled() {
        let config = LabelConfig::builtin().unwrap();
        let dates = &config.rules(FieldKind::DateMarks).unwrap().keywords;
        assert!(dates.contains(&"生产日期".to_string()));
        assert!(dates.contains(&"保质期至".to_string()));
        let nutrition = &config.rules(FieldKind::Nutrition).unwrap().keywords;
        assert!(nutrition.contains(&"营养成分表".to_string()));
    }

    #[test]
    fn test_confusion_tables() {
        let config = LabelConfig::builtin().unwrap();
        assert_eq!(config.numeric_confusions.run.get('O'), Some('0'));
        assert_eq!(config.numeric_confusions.run.get('l'), Some('1'));
        assert_eq!(config.numeric_confusions.between_digits.get('S'), Some('5'));
        assert!(!config.numeric_confusions.run.contains('B'));
    }

    #[test]
    fn test_multi_char_confusion_rejected() {
        let edited = DEFAULT_TABLES.replace("O = \"0\"", "OO = \"0\"");
        assert!(matches!(LabelConfig::from_toml_str(&edited), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_floor_rejected() {
        let edited = DEFAULT_TABLES.replacen("floor = 0.3", "floor = 1.5", 1);
        assert!(matches!(LabelConfig::from_toml_str(&edited), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_path() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let edited = DEFAULT_TABLES.replace("energy = 8400.0", "energy = 8000.0");
        temp_file.write_all(edited.as_bytes()).unwrap();

        let config = LabelConfig::from_path(temp_file.path()).unwrap();
        assert_eq!(config.reference_value(NutrientKind::Energy), Some(8000.0));
    }

    #[test]
    fn test_load_from_missing_path() {
        let result = LabelConfig::from_path(Path::new("/nonexistent/label_tables.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = LabelConfig::from_path(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
