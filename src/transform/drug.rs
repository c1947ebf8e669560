use serde_json::Value;
use tracing::debug;

use crate::entities::QueryMode;
use crate::entities::drug::{NOT_AVAILABLE, NormalizedDrug, UNKNOWN};
use crate::sources::drugbase::{DiseaseRow, DrugRow, MultiRow, SearchRow};

/// Splits a comma-joined backend list, dropping blanks.
pub(crate) fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Default)]
struct Fallbacks(Vec<&'static str>);

impl Fallbacks {
    fn text(&mut self, field: &'static str, value: Option<&str>, default: &str) -> String {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => {
                self.0.push(field);
                default.to_string()
            }
        }
    }

    fn list(&mut self, field: &'static str, value: Option<&str>) -> Vec<String> {
        let items = value.map(split_csv).unwrap_or_default();
        if items.is_empty() {
            self.0.push(field);
            return vec![NOT_AVAILABLE.to_string()];
        }
        items
    }

    fn id(&mut self, field: &'static str, value: Option<u64>) -> u64 {
        value.unwrap_or_else(|| {
            self.0.push(field);
            0
        })
    }

    fn price(&mut self, field: &'static str, value: Option<f64>) -> f64 {
        value.unwrap_or_else(|| {
            self.0.push(field);
            0.0
        })
    }
}

fn normalize_drug_row(row: &DrugRow, fb: &mut Fallbacks) -> NormalizedDrug {
    let generic = row
        .generic
        .as_deref()
        .map(split_csv)
        .filter(|v| !v.is_empty())
        .map(|v| v.join(", "));
    NormalizedDrug {
        id: fb.id("id", row.drug_id),
        name: fb.text("name", row.name.as_deref(), UNKNOWN),
        generic_name: fb.text("generic_name", generic.as_deref(), NOT_AVAILABLE),
        treatment: fb.list("treatment", row.treatments.as_deref()),
        manufacturer: fb.text("manufacturer", row.manufacturer.as_deref(), UNKNOWN),
        price: fb.price("price", row.brand_price),
        generic_price: fb.price("generic_price", row.generic_price),
        disease_count: None,
        fallbacks: Vec::new(),
    }
}

fn normalize_disease_row(row: &DiseaseRow, fb: &mut Fallbacks) -> NormalizedDrug {
    let treatment = match row.disease_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => vec![name.to_string()],
        _ => {
            fb.0.push("treatment");
            vec![NOT_AVAILABLE.to_string()]
        }
    };
    NormalizedDrug {
        id: fb.id("id", row.drug_id),
        name: fb.text("name", row.drug_name.as_deref(), UNKNOWN),
        generic_name: fb.text("generic_name", row.generic_name.as_deref(), NOT_AVAILABLE),
        treatment,
        // Disease rows carry no manufacturer column.
        manufacturer: UNKNOWN.to_string(),
        price: fb.price("price", row.brand_price),
        generic_price: fb.price("generic_price", row.generic_price),
        disease_count: None,
        fallbacks: Vec::new(),
    }
}

fn normalize_multi_row(row: &MultiRow, fb: &mut Fallbacks) -> NormalizedDrug {
    let disease_count = row.disease_count.unwrap_or_else(|| {
        fb.0.push("disease_count");
        0
    });
    NormalizedDrug {
        id: fb.id("id", row.drug_id),
        name: fb.text("name", row.name.as_deref(), UNKNOWN),
        // Multi rows carry neither a generic name nor a generic price.
        generic_name: NOT_AVAILABLE.to_string(),
        treatment: fb.list("treatment", row.disease_names.as_deref()),
        manufacturer: fb.text("manufacturer", row.manufacturer.as_deref(), UNKNOWN),
        price: fb.price("price", row.price),
        generic_price: 0.0,
        disease_count: Some(disease_count),
        fallbacks: Vec::new(),
    }
}

/// Maps a typed row to its display record. Never fails; missing fields take
/// `Unknown`, `N/A`, or `0` and are listed in [`NormalizedDrug::fallbacks`].
pub fn normalize(row: &SearchRow) -> NormalizedDrug {
    let mut fb = Fallbacks::default();
    let mut out = match row {
        SearchRow::Drug(row) => normalize_drug_row(row, &mut fb),
        SearchRow::Disease(row) => normalize_disease_row(row, &mut fb),
        SearchRow::Multi(row) => normalize_multi_row(row, &mut fb),
    };
    if !fb.0.is_empty() {
        debug!(
            mode = %row.mode(),
            id = out.id,
            fields = ?fb.0,
            "Normalization substituted defaults"
        );
    }
    out.fallbacks = fb.0;
    out
}

/// Decodes a raw wire row and normalizes it.
pub fn normalize_raw(value: &Value, mode: QueryMode) -> NormalizedDrug {
    normalize(&SearchRow::decode(mode, value))
}
