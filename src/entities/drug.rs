use serde::{Deserialize, Serialize};

pub const UNKNOWN: &str = "Unknown";
pub const NOT_AVAILABLE: &str = "N/A";

/// Uniform display record built from any mode's row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedDrug {
    pub id: u64,
    pub name: String,
    pub generic_name: String,
    pub treatment: Vec<String>,
    pub manufacturer: String,
    pub price: f64,
    pub generic_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disease_count: Option<u32>,
    /// Fields that fell back to a default because the row did not carry them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<&'static str>,
}

impl NormalizedDrug {
    pub fn price_comparison(&self) -> PriceComparison {
        PriceComparison::new(self.price, self.generic_price)
    }
}

/// Brand vs generic price, the textual stand-in for the comparison chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceComparison {
    pub brand_price: f64,
    pub generic_price: f64,
    pub savings: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_percent: Option<f64>,
}

impl PriceComparison {
    pub fn new(brand_price: f64, generic_price: f64) -> Self {
        let savings = brand_price - generic_price;
        let savings_percent = (brand_price > 0.0 && generic_price > 0.0)
            .then(|| savings / brand_price * 100.0);
        Self {
            brand_price,
            generic_price,
            savings,
            savings_percent,
        }
    }

    pub fn generic_is_cheaper(&self) -> bool {
        self.generic_price > 0.0 && self.savings > 0.0
    }
}
