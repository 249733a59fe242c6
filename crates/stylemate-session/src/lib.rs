//! stylemate-session — The interactive analysis session.
//!
//! Owns capture mode, model lifecycle, the refresh-driven polling loop
//! and the AR try-on stream. The presentation layer drives a [`Session`]
//! through its intent methods and renders the [`SessionEvent`]s it emits.

pub mod ar;
pub mod config;
pub mod events;
pub mod frame_source;
pub mod scheduler;
pub mod session;

#[cfg(test)]
mod fakes;

pub use ar::{ArError, Overlay};
pub use config::SessionConfig;
pub use events::{PublishedResult, SessionEvent};
pub use frame_source::{CaptureMode, FrameSource};
pub use scheduler::{FrameScheduler, RefreshClock, TickId};
pub use session::{Capabilities, PredictionJob, RunState, Session, SessionError, SessionStatus};
