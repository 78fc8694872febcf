//! Structured simulation events and the sinks that receive them.

use serde::Serialize;
use tracing::{debug, info};

/// Something that happened during a run. Cell indices are only meaningful
/// for the step the event belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    StepCompleted {
        step: usize,
        time: f64,
        cells: usize,
    },
    Proliferated {
        step: usize,
        parents: Vec<usize>,
        created: Vec<usize>,
    },
    Apoptosis {
        step: usize,
        removed: Vec<usize>,
    },
    Moved {
        step: usize,
        cells: usize,
    },
    /// A proliferation batch ran out of inner cells before `requested` splits
    ProliferationExhausted {
        requested: usize,
        completed: usize,
    },
}

/// Receiver for simulation events, passed explicitly into a run
pub trait EventSink {
    fn record(&mut self, event: &SimEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&mut self, _event: &SimEvent) {}
}

/// Collects events in order
impl EventSink for Vec<SimEvent> {
    fn record(&mut self, event: &SimEvent) {
        self.push(event.clone());
    }
}

/// Forwards events to `tracing`, reporting step progress every
/// `progress_every` steps.
#[derive(Debug, Clone)]
pub struct TracingSink {
    pub progress_every: usize,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self { progress_every: 100 }
    }
}

impl EventSink for TracingSink {
    fn record(&mut self, event: &SimEvent) {
        match event {
            SimEvent::StepCompleted { step, time, cells } => {
                if self.progress_every > 0 && step % self.progress_every == 0 {
                    info!(
                        event = "step_completed",
                        step = *step,
                        time = *time,
                        cells = *cells,
                        "Step {}: {} cells",
                        step,
                        cells
                    );
                }
            }
            SimEvent::Proliferated {
                step,
                parents,
                created,
            } => {
                debug!(
                    event = "proliferation",
                    step = *step,
                    parents = ?parents,
                    created = ?created,
                    "{} cells divided",
                    created.len()
                );
            }
            SimEvent::Apoptosis { step, removed } => {
                debug!(
                    event = "apoptosis",
                    step = *step,
                    removed = ?removed,
                    "{} cells removed",
                    removed.len()
                );
            }
            SimEvent::Moved { step, cells } => {
                debug!(event = "movement", step = *step, cells = *cells, "Cells moved");
            }
            SimEvent::ProliferationExhausted {
                requested,
                completed,
            } => {
                debug!(
                    event = "proliferation_exhausted",
                    requested = *requested,
                    completed = *completed,
                    "No inner cells left to divide"
                );
            }
        }
    }
}
