//! NRV% computation against the daily reference amounts.

use crate::config::LabelConfig;
use crate::error::Diagnostic;
use crate::types::{NrvResult, NutritionTable};
use tracing::warn;

/// Printed and computed NRV% may differ by this many points before it is reported.
const NRV_TOLERANCE: u32 = 2;

/// `amount / reference × 100`, rounded half away from zero.
pub fn percent(amount: f64, reference: f64) -> Option<u32> {
    if !(reference > 0.0) || !amount.is_finite() || amount < 0.0 {
        return None;
    }
    Some((amount / reference * 100.0).round() as u32)
}

/// NRV% for every entry with a reference amount, on the table's own basis. Entries whose
/// printed NRV% disagrees with the computed one are reported; the computed value is kept.
pub fn compute(table: &NutritionTable, config: &LabelConfig) -> (Vec<NrvResult>, Vec<Diagnostic>) {
    let mut results = Vec::new();
    let mut diagnostics = Vec::new();
    for entry in &table.entries {
        let Some(computed) = config
            .reference_value(entry.nutrient)
            .and_then(|reference| percent(entry.amount, reference))
        else {
            continue;
        };
        if let Some(declared) = entry.declared_nrv {
            if declared.abs_diff(computed) > NRV_TOLERANCE {
                warn!(
                    "{}: printed NRV {}% but amount gives {}%",
                    entry.nutrient.json_key(),
                    declared,
                    computed
                );
                diagnostics.push(Diagnostic::NrvMismatch {
                    nutrient: entry.nutrient,
                    declared,
                    computed,
                });
            }
        }
        results.push(NrvResult {
            nutrient: entry.nutrient,
            percent: computed,
        });
    }
    (results, diagnostics)
}
