use crate::TerminalState;
use std::sync::atomic::{AtomicBool, Ordering};

/// Latch letting through at most one terminal screenshot per execution.
#[derive(Debug, Default)]
pub struct TerminalGuard {
    final_sent: AtomicBool,
}

impl TerminalGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether an event with `action` may still be captured.
    ///
    /// The first terminal action wins the compare-and-set; after that every
    /// call returns false, terminal or not.
    pub fn should_send(&self, action: &str) -> bool {
        if TerminalState::from_action(action).is_none() {
            return !self.final_sent.load(Ordering::Acquire);
        }

        self.final_sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn final_sent(&self) -> bool {
        self.final_sent.load(Ordering::Acquire)
    }
}
