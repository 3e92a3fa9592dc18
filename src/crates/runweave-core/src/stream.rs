//! Run event streaming
//!
//! The engine projects its activity as an ordered sequence of [`RunEvent`]s:
//! a run-start, then per leaf `StepStart` → optional `StepCustom` events
//! written by the leaf → `StepResult` → `StepFinish`, a `StepWaiting` while a
//! sleep node parks the walk, and a final `RunFinish` with aggregate
//! metadata.
//!
//! # Ordering guarantees
//!
//! Per leaf, `start < result < finish` always holds: events are emitted
//! synchronously from the leaf's own execution, before the walk continues.
//! Custom events can only appear between a leaf's start and its result.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_stream::StreamExt;
//!
//! let mut stream = run.stream(json!({"value": "test"}));
//! while let Some(event) = stream.events.next().await {
//!     println!("{event:?}");
//! }
//! let result = stream.result().await?;
//! ```

use runweave_snapshot::{RunStatus, StepResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RunEvent {
    /// The walk is starting
    RunStart {
        /// Id of the run
        run_id: String,
        /// Id of the workflow definition
        workflow_name: String,
    },

    /// A leaf handler is about to be invoked
    StepStart {
        /// Id of the step
        step_id: String,
        /// Input the handler receives
        payload: Value,
    },

    /// Custom data written by the leaf via `StepContext::emit`
    StepCustom {
        /// Id of the emitting step
        step_id: String,
        /// Application-defined data
        data: Value,
    },

    /// The leaf's invocation settled; carries the full step record
    StepResult {
        /// Id of the step
        step_id: String,
        /// Step record after this invocation
        result: StepResult,
    },

    /// A sleep node parked the walk; transient, not a suspension
    StepWaiting {
        /// Id of the sleep node
        step_id: String,
    },

    /// The leaf's bookkeeping is complete; the walk moves on
    StepFinish {
        /// Id of the step
        step_id: String,
    },

    /// The run settled
    RunFinish {
        /// Id of the run
        run_id: String,
        /// Terminal (or paused/suspended) status
        status: RunStatus,
        /// Number of step records in the run
        steps: usize,
    },
}

/// Best-effort event sink handed through the walk
///
/// Disabled emitters drop every event, so non-streamed runs pay no channel
/// cost. Send failures (consumer dropped) are ignored; the walk's outcome
/// never depends on a listener.
#[derive(Debug, Clone)]
pub struct StreamEmitter {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl StreamEmitter {
    /// Emitter that drops all events
    pub(crate) fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emitter feeding an unbounded channel; returns the receiving half
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Emit one event; no-op when disabled or when the consumer is gone
    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disabled_emitter_drops_events() {
        let emitter = StreamEmitter::disabled();
        emitter.emit(RunEvent::StepFinish {
            step_id: "s".to_string(),
        });
    }

    #[tokio::test]
    async fn test_channel_emitter_delivers_in_order() {
        let (emitter, mut rx) = StreamEmitter::channel();
        emitter.emit(RunEvent::StepStart {
            step_id: "a".to_string(),
            payload: json!({}),
        });
        emitter.emit(RunEvent::StepFinish {
            step_id: "a".to_string(),
        });

        assert!(matches!(
            rx.recv().await,
            Some(RunEvent::StepStart { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(RunEvent::StepFinish { .. })
        ));
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = RunEvent::StepWaiting {
            step_id: "sleep_0".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "StepWaiting");
        assert_eq!(value["data"]["step_id"], "sleep_0");
    }
}
