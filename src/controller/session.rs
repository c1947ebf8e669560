//! Async driver that performs the controller's effects against the backend.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Effect, Event, FetchRequest, SearchController};
use crate::error::DrugBaseError;
use crate::sources::drugbase::{DrugBaseClient, SearchRow};

struct Completion {
    seq: u64,
    result: Result<Vec<SearchRow>, DrugBaseError>,
}

enum Wake {
    Debounce(u64),
    Completion(Completion),
}

/// Owns a [`SearchController`] and a [`DrugBaseClient`], turning effects into
/// timers and spawned requests and feeding their outcomes back as events.
pub struct SearchSession {
    controller: SearchController,
    client: DrugBaseClient,
    debounce: Option<(u64, Instant)>,
    in_flight: HashMap<u64, CancellationToken>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl SearchSession {
    pub fn new(controller: SearchController, client: DrugBaseClient) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            client,
            debounce: None,
            in_flight: HashMap::new(),
            completions_tx,
            completions_rx,
        }
    }

    pub fn controller(&self) -> &SearchController {
        &self.controller
    }

    /// Applies the controller's start-up effects. Must run inside a tokio runtime.
    pub fn start(&mut self) {
        let effects = self.controller.start();
        self.apply(effects);
    }

    /// Feeds one event to the controller and performs the resulting effects.
    pub fn dispatch(&mut self, event: Event) {
        let effects = self.controller.handle(event);
        self.apply(effects);
    }

    /// True while a debounce is armed or a fetch is outstanding.
    pub fn is_busy(&self) -> bool {
        self.debounce.is_some() || !self.in_flight.is_empty()
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ScheduleDebounce { generation, delay } => {
                    let now = Instant::now();
                    let deadline = now.checked_add(delay).unwrap_or_else(|| {
                        warn!(?delay, "Debounce delay out of range; using default");
                        now + super::DEFAULT_DEBOUNCE
                    });
                    self.debounce = Some((generation, deadline));
                }
                Effect::CancelDebounce => self.debounce = None,
                Effect::Fetch(request) => self.spawn_fetch(request),
                Effect::CancelFetch { seq } => {
                    if let Some(token) = self.in_flight.remove(&seq) {
                        debug!(seq, "Cancelling superseded fetch");
                        token.cancel();
                    }
                }
            }
        }
    }

    fn spawn_fetch(&mut self, request: FetchRequest) {
        let token = CancellationToken::new();
        self.in_flight.insert(request.seq, token.clone());
        debug!(
            seq = request.seq,
            kind = ?request.kind,
            mode = %request.query.mode,
            cursor = request.query.cursor,
            "Issuing search fetch"
        );

        let client = self.client.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                result = client.search(&request.query) => {
                    let _ = tx.send(Completion { seq: request.seq, result });
                }
            }
        });
    }

    /// Waits for the next timer or fetch outcome and converts it to an event.
    ///
    /// Returns `None` once nothing is pending.
    pub async fn next_event(&mut self) -> Option<Event> {
        if !self.is_busy() {
            return None;
        }
        let armed = self.debounce;
        let deadline = armed.map_or_else(Instant::now, |(_, at)| at);

        let wake = tokio::select! {
            () = tokio::time::sleep_until(deadline), if armed.is_some() => {
                Wake::Debounce(armed.map_or(0, |(generation, _)| generation))
            }
            Some(completion) = self.completions_rx.recv() => Wake::Completion(completion),
            else => return None,
        };

        Some(match wake {
            Wake::Debounce(generation) => {
                self.debounce = None;
                Event::DebounceElapsed { generation }
            }
            Wake::Completion(Completion { seq, result }) => {
                self.in_flight.remove(&seq);
                match result {
                    Ok(rows) => Event::FetchSucceeded { seq, rows },
                    Err(err) => {
                        warn!(seq, error = %err, "Search fetch failed");
                        Event::FetchFailed {
                            seq,
                            message: err.notice(),
                        }
                    }
                }
            }
        })
    }

    /// Drives timers and fetches until the controller has nothing pending.
    pub async fn settle(&mut self) {
        while let Some(event) = self.next_event().await {
            self.dispatch(event);
        }
    }

    /// Dispatches `event`, then settles.
    pub async fn run(&mut self, event: Event) {
        self.dispatch(event);
        self.settle().await;
    }
}
