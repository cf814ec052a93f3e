//! State identities and the state capability trait.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::context::EventCtx;
use super::error::ActionError;
use super::event::{Envelope, TypeKey};
use super::flag::FlagKey;

/// Dense identifier of a state within one machine definition.
///
/// Assigned in registration order by the builder; always
/// `0 <= id < state_count` and stable for the lifetime of the definition.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(u16);

impl StateId {
    pub(crate) fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// The raw id value.
    pub fn raw(self) -> u16 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Index of an orthogonal region, `0..region_count`.
///
/// One region exists per `initial(..)` call on the builder; each region
/// holds exactly one active [`StateId`] at a time.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(u16);

impl RegionId {
    /// A region index.
    pub fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// The raw index value.
    pub fn raw(self) -> u16 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Capability trait for plain states.
///
/// Every method has a default implementation, so a unit struct is already
/// a valid state. The engine creates one instance per declared state at
/// machine construction and keeps it for the machine's lifetime, so
/// instances may carry mutable state of their own.
///
/// `deferred_events`, `flags` and `interrupt_until` are consulted once,
/// when the machine definition is built.
pub trait StateBehavior<C>: Send + 'static {
    /// Called when the state is entered. `event` is the triggering event.
    fn on_entry(&mut self, event: &Envelope, ctx: &mut EventCtx<'_, C>) -> Result<(), ActionError> {
        let _ = (event, ctx);
        Ok(())
    }

    /// Called when the state is exited. `event` is the triggering event.
    fn on_exit(&mut self, event: &Envelope, ctx: &mut EventCtx<'_, C>) -> Result<(), ActionError> {
        let _ = (event, ctx);
        Ok(())
    }

    /// Event types this state cannot handle yet; while the state is
    /// active they are parked in the deferred queue instead of being
    /// dispatched.
    fn deferred_events(&self) -> Vec<TypeKey> {
        Vec::new()
    }

    /// Flags this state is a member of.
    fn flags(&self) -> Vec<FlagKey> {
        Vec::new()
    }

    /// For an interrupt state (one declaring
    /// [`InterruptFlag`](crate::InterruptFlag)): the event type that ends
    /// the interruption.
    fn interrupt_until(&self) -> Option<TypeKey> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_id_display_and_raw() {
        let id = StateId::new(3);
        assert_eq!(id.raw(), 3);
        assert_eq!(id.index(), 3);
        assert_eq!(id.to_string(), "s3");
    }

    #[test]
    fn region_id_display_and_raw() {
        let region = RegionId::new(1);
        assert_eq!(region.raw(), 1);
        assert_eq!(region.to_string(), "r1");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = StateId::new(9);
        assert_eq!(serde_json::to_string(&id).unwrap(), "9");
        let back: StateId = serde_json::from_str("9").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn default_behavior_is_inert() {
        struct Idle;
        impl StateBehavior<()> for Idle {}

        let idle = Idle;
        assert!(idle.deferred_events().is_empty());
        assert!(idle.flags().is_empty());
        assert!(idle.interrupt_until().is_none());
    }
}
