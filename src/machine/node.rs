//! Runtime state nodes.
//!
//! Each machine instance owns one node per declared state: a type-erased
//! wrapper around the user's state value, a nested machine core for
//! composite states, or a pseudo entry/exit marker.

use std::any::Any;
use std::sync::Arc;

use crate::core::{ActionError, Envelope, EventCtx, RegionId, StateBehavior, TypeKey};
use crate::table::{NodeMeta, NodeSeed, NodeSeedKind};

use super::MachineCore;

/// Object-safe view of a user state value.
pub(crate) trait ErasedState<C>: Send {
    fn on_entry(&mut self, event: &Envelope, ctx: &mut EventCtx<'_, C>) -> Result<(), ActionError>;
    fn on_exit(&mut self, event: &Envelope, ctx: &mut EventCtx<'_, C>) -> Result<(), ActionError>;
    fn as_any(&self) -> &dyn Any;
    fn clone_boxed(&self) -> Box<dyn ErasedState<C>>;
}

/// Blanket adapter from a concrete state type to the erased view.
pub(crate) struct TypedState<S>(pub S);

impl<C: 'static, S: StateBehavior<C> + Clone> ErasedState<C> for TypedState<S> {
    fn on_entry(&mut self, event: &Envelope, ctx: &mut EventCtx<'_, C>) -> Result<(), ActionError> {
        self.0.on_entry(event, ctx)
    }

    fn on_exit(&mut self, event: &Envelope, ctx: &mut EventCtx<'_, C>) -> Result<(), ActionError> {
        self.0.on_exit(event, ctx)
    }

    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn clone_boxed(&self) -> Box<dyn ErasedState<C>> {
        Box::new(TypedState(self.0.clone()))
    }
}

pub(crate) enum NodeKind<C> {
    /// A plain state with user behavior.
    State(Box<dyn ErasedState<C>>),
    /// A composite state: a nested machine.
    Machine(MachineCore<C>),
    /// Pseudo entry point into the given region.
    Entry(RegionId),
    /// Pseudo exit point forwarding the given event type upward.
    Exit(TypeKey),
}

pub(crate) struct Node<C> {
    pub meta: Arc<NodeMeta>,
    pub kind: NodeKind<C>,
}

impl<C: 'static> Node<C> {
    pub fn from_seed(seed: &NodeSeed<C>) -> Self {
        let kind = match &seed.kind {
            NodeSeedKind::State { make } => NodeKind::State(make()),
            NodeSeedKind::Submachine { def } => NodeKind::Machine(MachineCore::new(def, true)),
            NodeSeedKind::EntryPoint { region } => NodeKind::Entry(*region),
            NodeSeedKind::ExitPoint { event } => NodeKind::Exit(*event),
        };
        Self {
            meta: Arc::clone(&seed.meta),
            kind,
        }
    }

    pub fn submachine(&self) -> Option<&MachineCore<C>> {
        match &self.kind {
            NodeKind::Machine(core) => Some(core),
            _ => None,
        }
    }
}

impl<C: 'static> Clone for Node<C> {
    fn clone(&self) -> Self {
        let kind = match &self.kind {
            NodeKind::State(slot) => NodeKind::State(slot.clone_boxed()),
            NodeKind::Machine(core) => NodeKind::Machine(core.clone()),
            NodeKind::Entry(region) => NodeKind::Entry(*region),
            NodeKind::Exit(event) => NodeKind::Exit(*event),
        };
        Self {
            meta: Arc::clone(&self.meta),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Counter {
        entries: u32,
    }

    impl StateBehavior<()> for Counter {
        fn on_entry(
            &mut self,
            _event: &Envelope,
            _ctx: &mut EventCtx<'_, ()>,
        ) -> Result<(), ActionError> {
            self.entries += 1;
            Ok(())
        }
    }

    #[test]
    fn typed_state_erases_and_clones() {
        let mut slot: Box<dyn ErasedState<()>> = Box::new(TypedState(Counter { entries: 0 }));
        let mut unit = ();
        let mut raised = Vec::new();
        let mut deferrals = Vec::new();
        {
            let mut ctx = EventCtx::new(&mut unit, &mut raised, &mut deferrals);
            slot.on_entry(&Envelope::new(1u8), &mut ctx).unwrap();
        }

        let copy = slot.clone_boxed();
        let original = slot.as_any().downcast_ref::<Counter>().unwrap();
        let cloned = copy.as_any().downcast_ref::<Counter>().unwrap();
        assert_eq!(original.entries, 1);
        assert_eq!(cloned.entries, 1);
    }
}
