//! Dispatch results and event provenance.

use std::ops::BitOr;

/// Outcome of dispatching one event.
///
/// - `True`: a transition consumed the event.
/// - `False`: no row in any active region's table matched the event type.
/// - `GuardReject`: at least one row matched but every matching guard
///   declined; the event was "seen" but rejected, which is weaker than
///   `True` and stronger than `False` (it suppresses the no-transition
///   hook).
/// - `Deferred`: the event was parked in the deferred queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Handled {
    /// No matching row.
    False,
    /// A transition fired.
    True,
    /// Matched, but every guard declined; no state change occurred.
    GuardReject,
    /// Parked for later retry.
    Deferred,
}

impl Handled {
    /// True when a transition actually fired.
    pub fn is_handled(self) -> bool {
        matches!(self, Handled::True)
    }

    /// Combine the outcomes of independent regions. Priority:
    /// `True > Deferred > GuardReject > False`.
    pub(crate) fn merge(self, other: Handled) -> Handled {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }

    /// Combine a chain's running outcome with the next cell's. A plain
    /// `False` never erases an earlier `GuardReject`.
    pub(crate) fn chain(self, next: Handled) -> Handled {
        if next == Handled::False && self == Handled::GuardReject {
            Handled::GuardReject
        } else {
            next
        }
    }

    /// Chains stop at the first consuming outcome.
    pub(crate) fn stops_chain(self) -> bool {
        matches!(self, Handled::True | Handled::Deferred)
    }

    fn rank(self) -> u8 {
        match self {
            Handled::False => 0,
            Handled::GuardReject => 1,
            Handled::Deferred => 2,
            Handled::True => 3,
        }
    }
}

/// Where an event being processed came from. Bits, not variants: a queued
/// completion event is both direct and queue-sourced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct EventSource(u8);

impl EventSource {
    /// Internally generated (a submachine forward, for example).
    pub const DEFAULT: EventSource = EventSource(0);
    /// Raised by a caller (or counted as such: completion events, queued
    /// events). Direct events bump the deferred-queue sequence counter and
    /// are the ones that may trigger the no-transition hook on contained
    /// machines.
    pub const DIRECT: EventSource = EventSource(0b001);
    /// Replayed from the deferred queue.
    pub const DEFERRED: EventSource = EventSource(0b010);
    /// Drained from the message queue.
    pub const MSG_QUEUE: EventSource = EventSource(0b100);

    pub fn contains(self, other: EventSource) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventSource {
    type Output = EventSource;

    fn bitor(self, rhs: EventSource) -> EventSource {
        EventSource(self.0 | rhs.0)
    }
}
