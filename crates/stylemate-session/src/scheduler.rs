//! Refresh-driven tick scheduling.
//!
//! The session never sleeps or spawns. It asks a [`FrameScheduler`] for
//! one callback per refresh and is handed the [`TickId`] back by whoever
//! drives the clock. At most one tick is pending at a time.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TickId(pub u64);

/// Request/cancel side of a refresh clock.
pub trait FrameScheduler {
    /// Request one callback on the next refresh.
    fn schedule(&mut self) -> TickId;

    /// Withdraw a pending request. Ids that already fired are ignored.
    fn cancel(&mut self, tick: TickId);
}

#[derive(Debug, Default)]
struct ClockState {
    next_id: u64,
    pending: Option<TickId>,
}

/// [`FrameScheduler`] half handed to the session.
#[derive(Debug, Clone)]
pub struct RefreshScheduler {
    state: Arc<Mutex<ClockState>>,
}

impl FrameScheduler for RefreshScheduler {
    fn schedule(&mut self) -> TickId {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let tick = TickId(state.next_id);
        state.pending = Some(tick);
        tick
    }

    fn cancel(&mut self, tick: TickId) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.pending == Some(tick) {
            state.pending = None;
        }
    }
}

/// Driver half: fires the pending tick once per refresh period.
#[derive(Debug)]
pub struct RefreshClock {
    state: Arc<Mutex<ClockState>>,
    period: Duration,
    interval: Option<Interval>,
}

impl RefreshClock {
    /// Create a clock running at `hz` refreshes per second and its scheduler.
    pub fn new(hz: u32) -> (RefreshClock, RefreshScheduler) {
        let state = Arc::new(Mutex::new(ClockState::default()));
        let period = Duration::from_secs_f64(1.0 / f64::from(hz.max(1)));
        (
            RefreshClock {
                state: state.clone(),
                period,
                interval: None,
            },
            RefreshScheduler { state },
        )
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn pending(&self) -> Option<TickId> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
    }

    /// Wait for the next refresh and return the tick that was pending.
    ///
    /// Returns `None` immediately when nothing is scheduled, i.e. the
    /// loop has been paused or never started.
    pub async fn next_tick(&mut self) -> Option<TickId> {
        self.pending()?;

        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        interval.tick().await;

        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .take()
    }
}
