use serde::Serialize;

use crate::controller::{Phase, SearchController};
use crate::entities::QueryMode;
use crate::entities::drug::NormalizedDrug;
use crate::error::DrugBaseError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, DrugBaseError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Machine-readable snapshot of the current page.
#[derive(Debug, Serialize)]
pub struct SearchPageJson<'a> {
    pub mode: QueryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<&'a str>,
    pub min_diseases: u32,
    pub page: usize,
    pub cursor: u64,
    pub has_more: bool,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<&'a str>,
    pub results: Vec<NormalizedDrug>,
}

impl<'a> SearchPageJson<'a> {
    pub fn from_controller(ctl: &'a SearchController) -> Self {
        let state = ctl.state();
        Self {
            mode: state.mode,
            query: state
                .mode
                .uses_term()
                .then(|| state.search_term.trim())
                .filter(|q| !q.is_empty()),
            min_diseases: state.min_diseases,
            page: state.page_number(),
            cursor: state.cursor,
            has_more: state.has_more,
            phase: ctl.phase(),
            notice: ctl.notice(),
            results: ctl.normalized(),
        }
    }
}

pub fn search_page_json(ctl: &SearchController) -> Result<String, DrugBaseError> {
    to_pretty(&SearchPageJson::from_controller(ctl))
}
