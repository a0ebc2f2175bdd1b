use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Joining,
    Active,
    Leaving,
    Closed,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Joining,
            1 => ConnState::Active,
            2 => ConnState::Leaving,
            _ => ConnState::Closed,
        }
    }
}

/// Joining -> Active -> Leaving -> Closed, shared by a connection's two I/O loops.
///
/// Every exit path (client close, transport error, eviction) races to
/// `begin_leave`; exactly one of them wins.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnState::Joining as u8),
        }
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Joining -> Active
    pub fn activate(&self) -> bool {
        self.transition(ConnState::Joining, ConnState::Active)
    }

    /// Enter Leaving. Returns true only for the first caller.
    pub fn begin_leave(&self) -> bool {
        self.transition(ConnState::Active, ConnState::Leaving)
            || self.transition(ConnState::Joining, ConnState::Leaving)
    }

    /// Leaving -> Closed. A connection that never left is forced through Leaving first.
    pub fn close(&self) {
        self.begin_leave();
        self.state.store(ConnState::Closed as u8, Ordering::Release);
    }

    fn transition(&self, from: ConnState, to: ConnState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
