//! Lifecycle events for reconstruction stages.
//!
//! The controller reports each stage through a [`PipelineObserver`]: a start
//! event, then either a finish event with the elapsed time or a failure event
//! with the error message. The solver additionally sends periodic
//! [`PipelineEvent::SolverProgress`] ticks while it searches.
//!
//! # Example
//!
//! ```ignore
//! use polyrecon::progress::{CallbackObserver, PipelineEvent};
//!
//! let observer = CallbackObserver::new(|event: &PipelineEvent| {
//!     if let PipelineEvent::SolverProgress { nodes, incumbent } = event {
//!         eprintln!("{} nodes, best {:?}", nodes, incumbent);
//!     }
//! });
//! let mut controller = PipelineController::with_observer(Box::new(observer));
//! ```

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// A reconstruction stage driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Refine,
    GenerateHypothesis,
    ComputeConfidences,
    Optimize,
}

impl Stage {
    /// Operation name, matching the controller method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Refine => "refine",
            Stage::GenerateHypothesis => "generate_hypothesis",
            Stage::ComputeConfidences => "compute_confidences",
            Stage::Optimize => "optimize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event sent to a [`PipelineObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
    },
    StageFinished {
        stage: Stage,
        elapsed: Duration,
    },
    StageFailed {
        stage: Stage,
        message: String,
    },
    /// Periodic solver tick. `incumbent` is the best objective found so far.
    SolverProgress {
        nodes: u64,
        incumbent: Option<f64>,
    },
}

impl PipelineEvent {
    /// The stage this event belongs to. Solver ticks belong to [`Stage::Optimize`].
    pub fn stage(&self) -> Stage {
        match self {
            PipelineEvent::StageStarted { stage }
            | PipelineEvent::StageFinished { stage, .. }
            | PipelineEvent::StageFailed { stage, .. } => *stage,
            PipelineEvent::SolverProgress { .. } => Stage::Optimize,
        }
    }
}

/// Receiver of pipeline events.
///
/// Called synchronously on the thread running the stage; implementations
/// should return quickly.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {
    #[inline]
    fn on_event(&self, _event: &PipelineEvent) {}
}

/// Callback function for pipeline events.
pub type EventCallback = Box<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Observer forwarding every event to a closure.
pub struct CallbackObserver {
    callback: EventCallback,
}

impl CallbackObserver {
    pub fn new(callback: impl Fn(&PipelineEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl fmt::Debug for CallbackObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackObserver").finish_non_exhaustive()
    }
}

impl PipelineObserver for CallbackObserver {
    fn on_event(&self, event: &PipelineEvent) {
        (self.callback)(event);
    }
}

/// Observer recording every event in order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<PipelineEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events received so far.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stage start/finish/failure events only, without solver ticks.
    pub fn stage_events(&self) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, PipelineEvent::SolverProgress { .. }))
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PipelineObserver for EventLog {
    fn on_event(&self, event: &PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

impl<T: PipelineObserver + ?Sized> PipelineObserver for std::sync::Arc<T> {
    fn on_event(&self, event: &PipelineEvent) {
        (**self).on_event(event);
    }
}
