//! Per-subscription sequence numbers (the SEQ header / event key).

use std::fmt;

/// A GENA event key.
///
/// Key 0 names the initial event of a subscription (and, for the gate
/// counter, "nothing sent yet"). Advancing past the maximum representable
/// value wraps to 1, never back to 0, so 0 stays reserved for the initial
/// event for the lifetime of the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventKey(pub u32);

impl EventKey {
    /// The key assigned to the initial notification.
    pub const INITIAL: EventKey = EventKey(0);

    /// The key following this one, wrapping `u32::MAX` to 1.
    pub fn next(self) -> EventKey {
        match self.0.checked_add(1) {
            Some(n) => EventKey(n),
            None => EventKey(1),
        }
    }

    /// Advance in place, returning the pre-advance value.
    pub fn take_and_advance(&mut self) -> EventKey {
        let current = *self;
        *self = self.next();
        current
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
