//! Session gate shared between the control context and the render callback
//!
//! A run state plus an in-flight counter. The callback increments the counter
//! before looking at the state, so once `close` has stored the closed state and
//! `wait_idle` has seen the counter at zero, no callback is inside the data
//! source and none will enter it again.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

const RUNNING: u8 = 0;
const PAUSED: u8 = 1;
const ENDED: u8 = 2;
const CLOSED: u8 = 3;

pub(crate) struct SessionGate {
    state: AtomicU8,
    in_flight: AtomicUsize,
}

/// Proof that a callback is inside the gate; leaving is automatic on drop
pub(crate) struct GateGuard<'a> {
    gate: &'a SessionGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionGate {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Enter from the render callback; `None` when the session is not running
    #[inline]
    pub(crate) fn enter(&self) -> Option<GateGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = GateGuard { gate: self };
        if self.state.load(Ordering::SeqCst) == RUNNING {
            Some(guard)
        } else {
            None
        }
    }

    /// Running -> paused. False if the session already ended or closed.
    pub(crate) fn pause(&self) -> bool {
        self.transition(RUNNING, PAUSED)
    }

    /// Paused -> running. False if the session already ended or closed.
    pub(crate) fn resume(&self) -> bool {
        self.transition(PAUSED, RUNNING)
    }

    /// Running -> ended; true only for the one caller that made the transition
    #[inline]
    pub(crate) fn end(&self) -> bool {
        self.transition(RUNNING, ENDED)
    }

    pub(crate) fn close(&self) {
        self.state.store(CLOSED, Ordering::SeqCst);
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ENDED
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Spin until no callback is inside the gate
    pub(crate) fn wait_idle(&self) {
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
