//! Session events consumed by the presentation layer.

use crate::frame_source::CaptureMode;
use crate::session::RunState;
use serde::Serialize;
use stylemate_core::{Evaluation, ModelId};
use tokio::sync::mpsc;

/// A prediction result that passed the generation check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedResult {
    pub model: ModelId,
    pub mode: CaptureMode,
    pub evaluation: Evaluation,
    /// Sequence number of the frame the result was computed from.
    pub frame_sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ModeChanged { mode: CaptureMode },
    RunStateChanged { state: RunState },
    ModelChanged { model: ModelId },
    ImageUploaded { width: u32, height: u32 },
    Result { result: PublishedResult },
    /// Result area reset to its placeholder.
    ResultsCleared,
    /// Per-attempt or initialization failure, already rendered as text.
    Error { message: String },
    ArStateChanged { active: bool },
}

/// Fan-out of events to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver to all subscribers, dropping those whose receiver is gone.
    pub(crate) fn emit(&mut self, event: SessionEvent) {
        tracing::trace!(?event, "session event");
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
