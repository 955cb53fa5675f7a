//! Run event system for observability.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, a terminal UI, test harnesses) can follow a
//! run without coupling to the engine internals. Every event is stamped with
//! the wall-clock time it was emitted.

use chrono::{DateTime, Utc};
use docflow_types::{ActionId, RunStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::machine::DecisionSource;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    ScenarioLoaded {
        scenario_id: String,
        step_count: usize,
    },
    StatusChanged {
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
        step_index: usize,
    },
    StepEntered {
        run_id: Uuid,
        step_index: usize,
        step_id: String,
        is_ai: bool,
    },
    ReasoningRequested {
        run_id: Uuid,
        step_id: String,
    },
    ReasoningSucceeded {
        run_id: Uuid,
        step_id: String,
        action: ActionId,
        source: DecisionSource,
    },
    ReasoningFailed {
        run_id: Uuid,
        step_id: String,
        error: String,
    },
    ArtifactWritten {
        run_id: Uuid,
        key: String,
        value: String,
    },
    StaleResponseDiscarded {
        stale_run_id: Uuid,
        current_run_id: Uuid,
    },
    RunCompleted {
        run_id: Uuid,
        returned_to_author: bool,
        time_saved_minutes: f64,
    },
}

/// A [`RunEvent`] with its emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at: DateTime<Utc>,
    pub event: RunEvent,
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<TimedEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(TimedEvent {
            at: Utc::now(),
            event,
        });
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TimedEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
