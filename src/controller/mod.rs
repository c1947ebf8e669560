//! Search, pagination, and query-mode state machine.
//!
//! [`SearchController`] performs no I/O. Every input is an [`Event`]; every
//! side effect the caller must perform comes back as an [`Effect`]. The async
//! driver lives in [`session`].

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::entities::drug::NormalizedDrug;
use crate::entities::{QueryMode, SearchQuery};
use crate::sources::drugbase::SearchRow;

pub mod session;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_PAGE_SIZE: usize = 6;
pub const DEFAULT_MIN_DISEASES: u32 = 2;
/// Longest debounce accepted from the environment.
pub const MAX_DEBOUNCE: Duration = Duration::from_secs(10);

const DEBOUNCE_ENV: &str = "DRUGBASE_DEBOUNCE_MS";
const PAGE_SIZE_ENV: &str = "DRUGBASE_PAGE_SIZE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub debounce: Duration,
    /// A page with at least this many rows is assumed to have a successor.
    pub page_size: usize,
    pub initial_mode: QueryMode,
    pub min_diseases: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            page_size: DEFAULT_PAGE_SIZE,
            initial_mode: QueryMode::Drug,
            min_diseases: DEFAULT_MIN_DISEASES,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_number(DEBOUNCE_ENV) {
            config.debounce = debounce_from_millis(ms);
        }
        if let Some(size) = env_number(PAGE_SIZE_ENV).filter(|v| *v > 0) {
            config.page_size = usize::try_from(size).unwrap_or(DEFAULT_PAGE_SIZE);
        }
        config
    }
}

fn debounce_from_millis(ms: u64) -> Duration {
    let debounce = Duration::from_millis(ms);
    if debounce > MAX_DEBOUNCE {
        warn!(
            env = DEBOUNCE_ENV,
            requested_ms = ms,
            max_secs = MAX_DEBOUNCE.as_secs(),
            "Clamping debounce delay"
        );
        return MAX_DEBOUNCE;
    }
    debounce
}

fn env_number(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(env = var, value = raw, "Ignoring non-numeric setting");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Debouncing,
    Fetching,
    Ready,
    Empty,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    /// First page of a new search.
    Reset,
    /// Next page after the current cursor.
    Forward,
    /// Re-fetch of the previous page in the history.
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub seq: u64,
    pub kind: FetchKind,
    pub query: SearchQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Arm the debounce timer, replacing any pending one.
    ScheduleDebounce { generation: u64, delay: Duration },
    CancelDebounce,
    Fetch(FetchRequest),
    CancelFetch { seq: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SearchTermChanged(String),
    DebounceElapsed { generation: u64 },
    FetchSucceeded { seq: u64, rows: Vec<SearchRow> },
    FetchFailed { seq: u64, message: String },
    ModeToggled(QueryMode),
    MinDiseasesChanged(i64),
    NextPageRequested,
    PrevPageRequested,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchState {
    pub search_term: String,
    pub mode: QueryMode,
    /// Last-seen identifier of the current results; where the next page starts.
    pub cursor: u64,
    pub min_diseases: u32,
    pub results: Vec<SearchRow>,
    pub has_more: bool,
    /// Cursors that produced each visited page; the last one produced `results`.
    pub pagination_history: Vec<u64>,
    pub loading: bool,
}

impl SearchState {
    fn new(mode: QueryMode, min_diseases: u32) -> Self {
        Self {
            search_term: String::new(),
            mode,
            cursor: 0,
            min_diseases: min_diseases.max(1),
            results: Vec::new(),
            has_more: false,
            pagination_history: vec![0],
            loading: false,
        }
    }

    /// 1-based page number of the current results.
    pub fn page_number(&self) -> usize {
        self.pagination_history.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    seq: u64,
    kind: FetchKind,
    cursor: u64,
}

/// Cursor after a page produced from `producing`: the largest identifier in
/// the page, or `producing + 1` when the page carries none larger.
pub fn next_cursor(rows: &[SearchRow], producing: u64) -> u64 {
    match rows.iter().filter_map(SearchRow::record_id).max() {
        Some(id) if id > producing => id,
        _ => producing.saturating_add(1),
    }
}

#[derive(Debug)]
pub struct SearchController {
    config: ControllerConfig,
    state: SearchState,
    phase: Phase,
    notice: Option<String>,
    debounce_generation: u64,
    pending_debounce: Option<u64>,
    last_seq: u64,
    in_flight: Option<InFlight>,
}

impl SearchController {
    pub fn new(config: ControllerConfig) -> Self {
        let state = SearchState::new(config.initial_mode, config.min_diseases);
        Self {
            config,
            state,
            phase: Phase::Idle,
            notice: None,
            debounce_generation: 0,
            pending_debounce: None,
            last_seq: 0,
            in_flight: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Non-fatal message from the last failed fetch.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn can_go_next(&self) -> bool {
        self.state.has_more && self.in_flight.is_none()
    }

    pub fn can_go_prev(&self) -> bool {
        self.state.pagination_history.len() > 1 && self.in_flight.is_none()
    }

    /// No debounce pending and no fetch outstanding.
    pub fn is_settled(&self) -> bool {
        self.pending_debounce.is_none() && self.in_flight.is_none()
    }

    pub fn normalized(&self) -> Vec<NormalizedDrug> {
        self.state
            .results
            .iter()
            .map(crate::transform::drug::normalize)
            .collect()
    }

    /// Effects needed right after construction. `multi` needs no term, so it
    /// loads its first page immediately.
    pub fn start(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.state.mode.uses_term() {
            self.issue_fetch(FetchKind::Reset, 0, &mut effects);
        }
        effects
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            Event::SearchTermChanged(term) => self.on_term_changed(term, &mut effects),
            Event::DebounceElapsed { generation } => {
                self.on_debounce_elapsed(generation, &mut effects)
            }
            Event::FetchSucceeded { seq, rows } => self.on_fetch_succeeded(seq, rows),
            Event::FetchFailed { seq, message } => self.on_fetch_failed(seq, message),
            Event::ModeToggled(mode) => self.on_mode_toggled(mode, &mut effects),
            Event::MinDiseasesChanged(delta) => self.on_min_diseases_changed(delta, &mut effects),
            Event::NextPageRequested => self.on_next_page(&mut effects),
            Event::PrevPageRequested => self.on_prev_page(&mut effects),
        }
        debug!(
            phase = ?self.phase,
            cursor = self.state.cursor,
            history = ?self.state.pagination_history,
            effects = effects.len(),
            "Search controller transition"
        );
        effects
    }

    fn reset_pagination(&mut self) {
        self.state.cursor = 0;
        self.state.pagination_history = vec![0];
        self.state.has_more = false;
    }

    fn cancel_debounce(&mut self, effects: &mut Vec<Effect>) {
        if self.pending_debounce.take().is_some() {
            effects.push(Effect::CancelDebounce);
        }
    }

    fn cancel_in_flight(&mut self, effects: &mut Vec<Effect>) {
        if let Some(flight) = self.in_flight.take() {
            effects.push(Effect::CancelFetch { seq: flight.seq });
        }
        self.state.loading = false;
    }

    fn issue_fetch(&mut self, kind: FetchKind, cursor: u64, effects: &mut Vec<Effect>) {
        self.cancel_in_flight(effects);
        self.last_seq += 1;
        let seq = self.last_seq;
        self.in_flight = Some(InFlight { seq, kind, cursor });
        self.state.loading = true;
        self.phase = Phase::Fetching;
        effects.push(Effect::Fetch(FetchRequest {
            seq,
            kind,
            query: SearchQuery {
                mode: self.state.mode,
                term: self.state.search_term.trim().to_string(),
                cursor,
                min_diseases: self.state.min_diseases,
            },
        }));
    }

    fn on_term_changed(&mut self, term: String, effects: &mut Vec<Effect>) {
        self.state.search_term = term;
        self.reset_pagination();
        self.cancel_in_flight(effects);

        if self.state.mode.uses_term() && self.state.search_term.trim().is_empty() {
            self.cancel_debounce(effects);
            self.state.results.clear();
            self.notice = None;
            self.phase = Phase::Idle;
            return;
        }

        self.debounce_generation += 1;
        self.pending_debounce = Some(self.debounce_generation);
        self.phase = Phase::Debouncing;
        effects.push(Effect::ScheduleDebounce {
            generation: self.debounce_generation,
            delay: self.config.debounce,
        });
    }

    fn on_debounce_elapsed(&mut self, generation: u64, effects: &mut Vec<Effect>) {
        if self.pending_debounce != Some(generation) {
            debug!(generation, "Ignoring superseded debounce");
            return;
        }
        self.pending_debounce = None;
        if self.state.mode.uses_term() && self.state.search_term.trim().is_empty() {
            self.phase = Phase::Idle;
            return;
        }
        self.issue_fetch(FetchKind::Reset, 0, effects);
    }

    fn take_current_flight(&mut self, seq: u64) -> Option<InFlight> {
        match self.in_flight {
            Some(flight) if flight.seq == seq => {
                self.in_flight = None;
                self.state.loading = false;
                Some(flight)
            }
            _ => {
                debug!(seq, latest = self.last_seq, "Discarding stale fetch outcome");
                None
            }
        }
    }

    fn on_fetch_succeeded(&mut self, seq: u64, rows: Vec<SearchRow>) {
        let Some(flight) = self.take_current_flight(seq) else {
            return;
        };
        self.notice = None;
        let has_more = rows.len() >= self.config.page_size;

        match flight.kind {
            FetchKind::Reset => {
                self.state.pagination_history = vec![flight.cursor];
                if rows.is_empty() {
                    self.state.results.clear();
                    self.state.cursor = flight.cursor;
                    self.state.has_more = false;
                    self.phase = Phase::Empty;
                    return;
                }
                self.state.cursor = next_cursor(&rows, flight.cursor);
            }
            FetchKind::Forward => {
                if rows.is_empty() {
                    // Heuristic overshoot: keep the page on screen, stop paging.
                    self.state.has_more = false;
                    self.phase = Phase::Empty;
                    return;
                }
                self.state.pagination_history.push(flight.cursor);
                self.state.cursor = next_cursor(&rows, flight.cursor);
            }
            FetchKind::Backward => {
                if self.state.pagination_history.len() > 1 {
                    self.state.pagination_history.pop();
                }
                if rows.is_empty() {
                    self.state.results.clear();
                    self.state.cursor = flight.cursor;
                    self.state.has_more = false;
                    self.phase = Phase::Empty;
                    return;
                }
                self.state.cursor = next_cursor(&rows, flight.cursor);
            }
        }

        self.state.results = rows;
        self.state.has_more = has_more;
        self.phase = Phase::Ready;
    }

    fn on_fetch_failed(&mut self, seq: u64, message: String) {
        if self.take_current_flight(seq).is_none() {
            return;
        }
        self.notice = Some(message);
        self.phase = Phase::Error;
    }

    fn on_mode_toggled(&mut self, mode: QueryMode, effects: &mut Vec<Effect>) {
        self.cancel_debounce(effects);
        self.cancel_in_flight(effects);
        self.state.mode = mode;
        self.state.search_term.clear();
        self.state.results.clear();
        self.reset_pagination();
        self.notice = None;

        if mode.uses_term() {
            self.phase = Phase::Idle;
        } else {
            self.issue_fetch(FetchKind::Reset, 0, effects);
        }
    }

    fn on_min_diseases_changed(&mut self, delta: i64, effects: &mut Vec<Effect>) {
        let updated = i64::from(self.state.min_diseases)
            .saturating_add(delta)
            .max(1);
        self.state.min_diseases = u32::try_from(updated).unwrap_or(u32::MAX);

        if self.state.mode != QueryMode::Multi {
            return;
        }
        self.cancel_debounce(effects);
        self.reset_pagination();
        self.issue_fetch(FetchKind::Reset, 0, effects);
    }

    fn on_next_page(&mut self, effects: &mut Vec<Effect>) {
        if !self.can_go_next() {
            debug!(
                has_more = self.state.has_more,
                loading = self.state.loading,
                "Next page unavailable"
            );
            return;
        }
        self.issue_fetch(FetchKind::Forward, self.state.cursor, effects);
    }

    fn on_prev_page(&mut self, effects: &mut Vec<Effect>) {
        if !self.can_go_prev() {
            debug!(
                depth = self.state.pagination_history.len(),
                loading = self.state.loading,
                "Previous page unavailable"
            );
            return;
        }
        let history = &self.state.pagination_history;
        let target = history[history.len() - 2];
        self.issue_fetch(FetchKind::Backward, target, effects);
    }
}
