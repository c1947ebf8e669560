//! Query vocabulary and display models shared by the client, controller, and renderers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DrugBaseError;

pub mod drug;

/// Selects the entity being searched, and with it the endpoint and row shape.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    #[default]
    Drug,
    Disease,
    Multi,
}

impl QueryMode {
    pub const ALL: [QueryMode; 3] = [QueryMode::Drug, QueryMode::Disease, QueryMode::Multi];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drug => "drug",
            Self::Disease => "disease",
            Self::Multi => "multi",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Drug => "Drug Search",
            Self::Disease => "Disease Search",
            Self::Multi => "Multi-Disease Treatments",
        }
    }

    /// Toggle order: drug, disease, multi, then back to drug.
    pub fn next(self) -> Self {
        match self {
            Self::Drug => Self::Disease,
            Self::Disease => Self::Multi,
            Self::Multi => Self::Drug,
        }
    }

    /// `multi` searches by disease-count threshold and ignores the term.
    pub fn uses_term(self) -> bool {
        !matches!(self, Self::Multi)
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = DrugBaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drug" | "drugs" => Ok(Self::Drug),
            "disease" | "diseases" => Ok(Self::Disease),
            "multi" | "multi-disease" => Ok(Self::Multi),
            other => Err(DrugBaseError::InvalidArgument(format!(
                "Unknown mode '{other}'. Expected one of: drug, disease, multi"
            ))),
        }
    }
}

/// Everything the backend needs to serve one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub mode: QueryMode,
    pub term: String,
    pub cursor: u64,
    pub min_diseases: u32,
}
