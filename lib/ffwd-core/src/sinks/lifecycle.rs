use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a sink.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SinkState {
    /// Built, not started yet.
    Created = 0,

    /// Start in progress.
    Starting = 1,

    /// Started and able to accept sends.
    Ready = 2,

    /// Stop in progress.
    Stopping = 3,

    /// Stopped. Terminal.
    Stopped = 4,
}

impl SinkState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Atomic lifecycle tracking for sinks.
///
/// Transitions:
///
/// - `Created -> Starting -> Ready`
/// - `Starting -> Created` when a start is abandoned
/// - any state `-> Stopping -> Stopped`
///
/// Nothing leaves `Stopped`, and nothing but `Stopped` follows `Stopping`.
#[derive(Debug)]
pub struct SinkLifecycle {
    state: AtomicU8,
}

impl SinkLifecycle {
    /// Creates a new `SinkLifecycle` in the `Created` state.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(SinkState::Created as u8),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SinkState {
        SinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` if the sink is `Ready`.
    pub fn is_ready(&self) -> bool {
        self.state() == SinkState::Ready
    }

    /// Marks a start as in progress.
    ///
    /// Returns `false` if the sink is stopping or stopped, in which case it must not be started.
    pub fn begin_start(&self) -> bool {
        self.update(|current| match current {
            SinkState::Created => Some(SinkState::Starting),
            SinkState::Starting | SinkState::Ready => Some(current),
            SinkState::Stopping | SinkState::Stopped => None,
        })
    }

    /// Completes a start. Returns `false` if the sink was stopped in the meantime.
    pub fn finish_start(&self) -> bool {
        self.transition(SinkState::Starting, SinkState::Ready) || self.state() == SinkState::Ready
    }

    /// Abandons a start, returning to `Created` unless the sink was stopped in the meantime.
    pub fn abort_start(&self) {
        self.transition(SinkState::Starting, SinkState::Created);
    }

    /// Marks a stop as in progress.
    ///
    /// Returns `false` if the sink is already stopped.
    pub fn begin_stop(&self) -> bool {
        self.update(|current| match current {
            SinkState::Stopped => None,
            _ => Some(SinkState::Stopping),
        })
    }

    /// Completes a stop.
    pub fn finish_stop(&self) {
        self.state.store(SinkState::Stopped as u8, Ordering::Release);
    }

    fn transition(&self, from: SinkState, to: SinkState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn update<F>(&self, f: F) -> bool
    where
        F: Fn(SinkState) -> Option<SinkState>,
    {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                f(SinkState::from_u8(current)).map(|next| next as u8)
            })
            .is_ok()
    }
}

impl Default for SinkLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
