//! Transition rows: the public declaration type and the resolved form the
//! dispatch table executes.

use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::core::{ActionError, Envelope, Event, EventCtx, RegionId, StateId, TypeKey};

/// Type-erased guard. Guards are pure predicates over the shared context
/// and the event; they cannot fail and cannot raise events.
pub(crate) type GuardFn<C> = Arc<dyn Fn(&C, &Envelope) -> bool + Send + Sync>;

/// Type-erased action / machine-level hook.
pub(crate) type ActionFn<C> =
    Arc<dyn Fn(&mut EventCtx<'_, C>, &Envelope) -> Result<(), ActionError> + Send + Sync>;

/// Where a transition starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceRef {
    /// A state of this machine (plain or composite).
    State(StateId),
    /// A pseudo exit point of a composite state: the transition fires when
    /// the forwarded exit event arrives and the exit point is active
    /// inside the owning submachine.
    ExitPoint { owner: StateId, exit: StateId },
}

impl From<StateId> for SourceRef {
    fn from(state: StateId) -> Self {
        SourceRef::State(state)
    }
}

/// Where a transition lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetRef {
    /// A state of this machine (plain or composite; a composite target is
    /// entered through its declared initial configuration or history).
    State(StateId),
    /// A pseudo entry point of a composite state: the composite is entered
    /// with the entry point active in its region, then the triggering
    /// event is processed inside so the entry point's outgoing transition
    /// fires.
    EntryPoint { owner: StateId, entry: StateId },
    /// Direct entry (one target) or fork (several targets, one per
    /// region): the composite is entered with the listed sub-states
    /// active instead of the declared initial configuration.
    Direct {
        owner: StateId,
        targets: Vec<(RegionId, StateId)>,
    },
}

impl From<StateId> for TargetRef {
    fn from(state: StateId) -> Self {
        TargetRef::State(state)
    }
}

impl TargetRef {
    /// Direct entry into one sub-state of a composite.
    pub fn direct(owner: StateId, region: RegionId, state: StateId) -> Self {
        TargetRef::Direct {
            owner,
            targets: vec![(region, state)],
        }
    }

    /// Fork into several sub-states of a composite, one per region.
    pub fn fork(owner: StateId, targets: impl IntoIterator<Item = (RegionId, StateId)>) -> Self {
        TargetRef::Direct {
            owner,
            targets: targets.into_iter().collect(),
        }
    }
}

/// Row kinds as declared.
#[derive(Clone, Debug)]
pub(crate) enum RowDefKind {
    /// Exit source, run action, enter target.
    External { source: SourceRef, target: TargetRef },
    /// Guard and action only; the state is neither exited nor re-entered.
    Internal { state: StateId },
    /// Internal transition of the machine itself (dispatch-table slot 0),
    /// tried in addition to the per-state chains.
    MachineInternal,
}

/// A declared transition before resolution.
pub(crate) struct RowDef<C> {
    pub event: TypeKey,
    pub kind: RowDefKind,
    pub guard: Option<GuardFn<C>>,
    pub action: Option<ActionFn<C>>,
}

/// One row of the transition table, typed on its triggering event.
///
/// Built fluently and handed to
/// [`MachineDefBuilder::transition`](crate::MachineDefBuilder::transition):
///
/// ```rust
/// use machina::{MachineDefBuilder, StateBehavior, Transition};
///
/// #[derive(Clone)]
/// struct Idle;
/// impl StateBehavior<u32> for Idle {}
///
/// #[derive(Clone)]
/// struct Busy;
/// impl StateBehavior<u32> for Busy {}
///
/// #[derive(Clone, Debug)]
/// struct Kick;
///
/// let mut builder = MachineDefBuilder::<u32>::new("worker");
/// let idle = builder.state(|| Idle);
/// let busy = builder.state(|| Busy);
/// builder.initial(idle);
/// builder.transition(
///     Transition::<u32, Kick>::external(idle, busy)
///         .guard(|budget, _kick| *budget > 0)
///         .action(|ctx, _kick| {
///             *ctx.context_mut() -= 1;
///             Ok(())
///         }),
/// );
/// let def = builder.build().unwrap();
/// assert_eq!(def.state_count(), 2);
/// ```
pub struct Transition<C, E: Event> {
    pub(crate) row: RowDef<C>,
    _event: PhantomData<fn(E)>,
}

impl<C: 'static, E: Event> Transition<C, E> {
    fn with_kind(kind: RowDefKind) -> Self {
        Self {
            row: RowDef {
                event: TypeKey::of::<E>(),
                kind,
                guard: None,
                action: None,
            },
            _event: PhantomData,
        }
    }

    /// A normal transition: exit `source`, run the action, enter `target`.
    pub fn external(source: impl Into<SourceRef>, target: impl Into<TargetRef>) -> Self {
        Self::with_kind(RowDefKind::External {
            source: source.into(),
            target: target.into(),
        })
    }

    /// An internal transition of `state`: guard and action run, the state
    /// is neither exited nor re-entered.
    pub fn internal(state: StateId) -> Self {
        Self::with_kind(RowDefKind::Internal { state })
    }

    /// An internal transition of the machine itself, tried in addition to
    /// the per-state chains whenever this event type is processed.
    pub fn machine_internal() -> Self {
        Self::with_kind(RowDefKind::MachineInternal)
    }

    /// Guard this row. Default: always true.
    pub fn guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&C, &E) -> bool + Send + Sync + 'static,
    {
        self.row.guard = Some(Arc::new(move |ctx, env| {
            // The table only dispatches this row for its own event type.
            env.downcast::<E>().map(|event| guard(ctx, event)).unwrap_or(false)
        }));
        self
    }

    /// Attach an action. Default: no-op.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut EventCtx<'_, C>, &E) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.row.action = Some(Arc::new(move |ctx, env| match env.downcast::<E>() {
            Some(event) => action(ctx, event),
            None => Ok(()),
        }));
        self
    }
}

/// Resolved target of an external row.
#[derive(Clone, Debug)]
pub(crate) enum ResolvedTarget {
    State(StateId),
    /// Entry into a composite with explicit sub-targets (direct entry,
    /// fork, or an entry point).
    Composite {
        owner: StateId,
        targets: SmallVec<[(RegionId, StateId); 2]>,
        via_entry_point: bool,
    },
}

impl ResolvedTarget {
    /// The state id recorded in the active configuration.
    pub fn dispatch_id(&self) -> StateId {
        match self {
            ResolvedTarget::State(id) => *id,
            ResolvedTarget::Composite { owner, .. } => *owner,
        }
    }
}

/// Resolved execution shape of a row.
#[derive(Clone, Debug)]
pub(crate) enum RowExec {
    External {
        /// The state exited by this row. For an exit-point source this is
        /// the owning composite.
        source: StateId,
        /// For an exit-point source: the exit-point id inside the owning
        /// submachine, which must be active for the row to fire.
        exit_check: Option<StateId>,
        target: ResolvedTarget,
    },
    Internal {
        state: StateId,
    },
    MachineInternal,
}

/// A resolved, immutable transition row.
pub(crate) struct Row<C> {
    pub event: TypeKey,
    pub exec: RowExec,
    pub guard: Option<GuardFn<C>>,
    pub action: Option<ActionFn<C>>,
}

impl<C> Row<C> {
    /// Dispatch-table slot: `StateId + 1`, slot 0 for machine-internal rows.
    pub fn slot(&self) -> usize {
        match &self.exec {
            RowExec::External { source, .. } => source.index() + 1,
            RowExec::Internal { state } => state.index() + 1,
            RowExec::MachineInternal => 0,
        }
    }
}
