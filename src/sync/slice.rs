use tracing::{debug, warn};

use crate::backend::TransportError;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DataOrigin {
    Remote,
    Fallback,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SliceState {
    Idle,
    Loading,
    Ready(DataOrigin),
}

/// Proof that a load was started; carries the generation it belongs to so a
/// late response can be recognized and discarded.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[must_use]
pub struct LoadTicket {
    generation: u64,
}

/// One independently loaded slice of the hierarchy (categories, projects of
/// the selected category, steps of the selected project, ...). Holds the
/// current snapshot, the load state machine, and the fallback advisory.
#[derive(Debug)]
pub struct Slice<T> {
    name: &'static str,
    state: SliceState,
    generation: u64,
    items: Vec<T>,
    advisory: Option<String>,
}

impl<T> Slice<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_seed(name, Vec::new())
    }

    pub fn with_seed(name: &'static str, seed: Vec<T>) -> Self {
        Self {
            name,
            state: SliceState::Idle,
            generation: 0,
            items: seed,
            advisory: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> SliceState {
        self.state
    }

    pub fn origin(&self) -> Option<DataOrigin> {
        match self.state {
            SliceState::Ready(origin) => Some(origin),
            _ => None,
        }
    }

    pub fn advisory(&self) -> Option<&str> {
        self.advisory.as_deref()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut Vec<T> {
        &mut self.items
    }

    /// Start a load. Bumps the generation, so any response still in flight
    /// for an earlier ticket becomes stale.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.generation += 1;
        self.state = SliceState::Loading;
        LoadTicket {
            generation: self.generation,
        }
    }

    /// Apply a load outcome. Returns false when the ticket was superseded by
    /// a newer `begin_load`/`prime`, in which case nothing changes.
    ///
    /// Only a non-empty success is trusted as live data. An empty success is
    /// routed to fallback exactly like a transport failure: the previous
    /// snapshot stays visible behind an advisory.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        outcome: Result<Vec<T>, TransportError>,
    ) -> bool {
        if ticket.generation != self.generation {
            debug!(slice = self.name, "discarding stale load response");
            return false;
        }

        match outcome {
            Ok(items) if !items.is_empty() => {
                self.items = items;
                self.state = SliceState::Ready(DataOrigin::Remote);
                self.advisory = None;
            }
            Ok(_) => {
                warn!(
                    slice = self.name,
                    "backend returned no rows; keeping cached snapshot"
                );
                self.state = SliceState::Ready(DataOrigin::Fallback);
                self.advisory = Some(format!(
                    "showing cached {}: backend returned no data",
                    self.name
                ));
            }
            Err(err) => {
                warn!(
                    slice = self.name,
                    error = %err,
                    "backend read failed; keeping cached snapshot"
                );
                self.advisory = Some(format!("showing cached {}: {err}", self.name));
                self.state = SliceState::Ready(DataOrigin::Fallback);
            }
        }
        true
    }

    /// Replace the snapshot outside the load protocol (selection changed and
    /// the new slice starts from locally cached children). Invalidates any
    /// load still in flight.
    pub fn prime(&mut self, items: Vec<T>) {
        self.generation += 1;
        self.items = items;
        self.state = SliceState::Idle;
        self.advisory = None;
    }
}
