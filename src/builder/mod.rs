//! Fluent declaration of machine definitions.
//!
//! A [`MachineDefBuilder`] collects states, regions, transition rows and
//! configuration, then validates the whole declaration in
//! [`build`](MachineDefBuilder::build). Everything static about a machine
//! is wired here; anything that survives `build()` is a legal definition.

mod error;

pub use error::BuildError;

use std::any::TypeId;
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::core::{
    ActionError, Envelope, Event, EventCtx, FlagKey, RegionId, StateBehavior, StateId,
    TerminateFlag, TypeKey,
};
use crate::machine::history::HistoryPolicy;
use crate::machine::node::{ErasedState, TypedState};
use crate::machine::queue::QueueOrder;
use crate::table::{
    ActionErrorHookFn, ActionFn, CompletionDef, MachineDef, MakeNodeFn, NodeMeta, NodeSeed,
    NodeSeedKind, NoTransitionFn, ResolvedTarget, Row, RowDef, RowDefKind, RowExec, SourceRef,
    TargetRef, Transition,
};

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Builder for [`MachineDef`].
///
/// States are registered first (each registration returns the state's
/// [`StateId`]), then regions and transitions reference them by id.
pub struct MachineDefBuilder<C> {
    name: String,
    seeds: Vec<NodeSeed<C>>,
    rows: Vec<RowDef<C>>,
    initial: Vec<StateId>,
    history: HistoryPolicy,
    queue_order: QueueOrder,
    completion: Option<CompletionDef>,
    no_transition: Option<NoTransitionFn<C>>,
    action_error_hook: Option<ActionErrorHookFn<C>>,
    entry_hook: Option<ActionFn<C>>,
    exit_hook: Option<ActionFn<C>>,
}

impl<C: 'static> MachineDefBuilder<C> {
    /// Start a new definition. The name shows up in logging and
    /// snapshots.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seeds: Vec::new(),
            rows: Vec::new(),
            initial: Vec::new(),
            history: HistoryPolicy::default(),
            queue_order: QueueOrder::default(),
            completion: None,
            no_transition: None,
            action_error_hook: None,
            entry_hook: None,
            exit_hook: None,
        }
    }

    fn push_seed(&mut self, kind: NodeSeedKind<C>, meta: NodeMeta) -> StateId {
        let id = StateId::new(self.seeds.len() as u16);
        self.seeds.push(NodeSeed {
            kind,
            meta: Arc::new(meta),
        });
        id
    }

    /// Register a plain state. `make` constructs the per-machine
    /// instance; capability methods (`deferred_events`, `flags`,
    /// `interrupt_until`) are sampled once, here.
    pub fn state<S, F>(&mut self, make: F) -> StateId
    where
        S: StateBehavior<C> + Clone,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let probe = make();
        let flags: Box<[FlagKey]> = probe.flags().into_boxed_slice();
        let terminate = flags.contains(&FlagKey::of::<TerminateFlag>());
        let meta = NodeMeta {
            name: short_type_name::<S>().to_string(),
            type_id: Some(TypeId::of::<S>()),
            deferred: probe.deferred_events().into_boxed_slice(),
            interrupt_end: probe.interrupt_until(),
            flags,
            terminate,
        };
        let make: MakeNodeFn<C> = Arc::new(move || {
            let node: Box<dyn ErasedState<C>> = Box::new(TypedState(make()));
            node
        });
        self.push_seed(NodeSeedKind::State { make }, meta)
    }

    /// Register a composite state: a nested machine built from its own
    /// definition. Unmatched events forward into it before this machine's
    /// own rows run.
    pub fn submachine(&mut self, def: Arc<MachineDef<C>>) -> StateId {
        let meta = NodeMeta {
            name: def.name().to_string(),
            type_id: None,
            deferred: Box::default(),
            flags: Box::default(),
            interrupt_end: None,
            terminate: false,
        };
        self.push_seed(NodeSeedKind::Submachine { def }, meta)
    }

    /// Register a pseudo entry point into `region` of *this* machine.
    /// Containing machines route into it with
    /// [`TargetRef::EntryPoint`].
    pub fn entry_point(&mut self, region: RegionId) -> StateId {
        let meta = NodeMeta {
            name: format!("entry({region})"),
            type_id: None,
            deferred: Box::default(),
            flags: Box::default(),
            interrupt_end: None,
            terminate: false,
        };
        self.push_seed(NodeSeedKind::EntryPoint { region }, meta)
    }

    /// Register a pseudo exit point of *this* machine, forwarding `E` to
    /// the containing machine when entered. Containing machines anchor
    /// transitions on it with [`SourceRef::ExitPoint`].
    pub fn exit_point<E: Event>(&mut self) -> StateId {
        let event = TypeKey::of::<E>();
        let meta = NodeMeta {
            name: format!("exit({event})"),
            type_id: None,
            deferred: Box::default(),
            flags: Box::default(),
            interrupt_end: None,
            terminate: false,
        };
        self.push_seed(NodeSeedKind::ExitPoint { event }, meta)
    }

    /// Declare a region with its initial state. Regions are created in
    /// call order; the returned [`RegionId`] indexes the active
    /// configuration.
    pub fn initial(&mut self, state: StateId) -> RegionId {
        let region = RegionId::new(self.initial.len() as u16);
        self.initial.push(state);
        region
    }

    /// Add a transition row. For a given `(state, event)` pair,
    /// later-declared rows take priority.
    pub fn transition<E: Event>(&mut self, transition: Transition<C, E>) -> &mut Self {
        self.rows.push(transition.row);
        self
    }

    /// Set the history policy (default: no history).
    pub fn history(&mut self, policy: HistoryPolicy) -> &mut Self {
        self.history = policy;
        self
    }

    /// Set the replay order of the deferred and message queues.
    pub fn queue_order(&mut self, order: QueueOrder) -> &mut Self {
        self.queue_order = order;
        self
    }

    /// Declare `E` as the machine's completion ("anonymous") event: it is
    /// processed automatically after every handled event, which is what
    /// drives eventless transitions.
    pub fn completion_event<E: Event + Default>(&mut self) -> &mut Self {
        self.completion = Some(CompletionDef {
            key: TypeKey::of::<E>(),
            make: Arc::new(|| Envelope::new(E::default())),
        });
        self
    }

    /// Hook invoked once per active region when a directly raised event
    /// matches no row. Default: a `tracing` debug line.
    pub fn on_no_transition(
        &mut self,
        hook: impl Fn(&Envelope, &mut C, StateId) + Send + Sync + 'static,
    ) -> &mut Self {
        self.no_transition = Some(Arc::new(hook));
        self
    }

    /// Hook invoked when an action or entry/exit callback fails. With a
    /// hook installed the failing dispatch reports
    /// [`Handled::False`](crate::Handled::False); without one the error
    /// propagates out of `process_event`.
    pub fn on_action_error(
        &mut self,
        hook: impl Fn(&Envelope, &mut C, &ActionError) + Send + Sync + 'static,
    ) -> &mut Self {
        self.action_error_hook = Some(Arc::new(hook));
        self
    }

    /// Hook run when this machine (level) is entered, before its states.
    pub fn entry_hook(
        &mut self,
        hook: impl Fn(&mut EventCtx<'_, C>, &Envelope) -> Result<(), ActionError>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.entry_hook = Some(Arc::new(hook));
        self
    }

    /// Hook run when this machine (level) is exited, after its states.
    pub fn exit_hook(
        &mut self,
        hook: impl Fn(&mut EventCtx<'_, C>, &Envelope) -> Result<(), ActionError>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.exit_hook = Some(Arc::new(hook));
        self
    }

    /// Validate the declaration and freeze it into a [`MachineDef`].
    pub fn build(self) -> Result<MachineDef<C>, BuildError> {
        let Self {
            name,
            seeds,
            rows,
            initial,
            history,
            queue_order,
            completion,
            no_transition,
            action_error_hook,
            entry_hook,
            exit_hook,
        } = self;

        if initial.is_empty() {
            return Err(BuildError::MissingInitialState);
        }
        if rows.is_empty() {
            return Err(BuildError::NoTransitions);
        }

        for &state in &initial {
            check_state(&seeds, state)?;
            match seeds[state.index()].kind {
                NodeSeedKind::State { .. } | NodeSeedKind::Submachine { .. } => {}
                _ => return Err(BuildError::InvalidInitialState { state }),
            }
        }

        // Entry points route into this machine's own regions.
        for seed in &seeds {
            if let NodeSeedKind::EntryPoint { region } = seed.kind {
                if region.index() >= initial.len() {
                    return Err(BuildError::UnknownRegion {
                        region,
                        regions: initial.len(),
                    });
                }
            }
        }

        let mut resolved = Vec::with_capacity(rows.len());
        for row in rows {
            let exec = match row.kind {
                RowDefKind::External { source, target } => {
                    let (source_id, exit_check) = resolve_source(&seeds, source, row.event)?;
                    let target = resolve_target(&seeds, target, row.event)?;
                    RowExec::External {
                        source: source_id,
                        exit_check,
                        target,
                    }
                }
                RowDefKind::Internal { state } => {
                    check_state(&seeds, state)?;
                    RowExec::Internal { state }
                }
                RowDefKind::MachineInternal => RowExec::MachineInternal,
            };
            resolved.push(Arc::new(Row {
                event: row.event,
                exec,
                guard: row.guard,
                action: row.action,
            }));
        }

        Ok(MachineDef::from_parts(
            name,
            seeds,
            resolved,
            SmallVec::from_vec(initial),
            history,
            queue_order,
            completion,
            no_transition,
            action_error_hook,
            entry_hook,
            exit_hook,
        ))
    }
}

fn check_state<C>(seeds: &[NodeSeed<C>], state: StateId) -> Result<(), BuildError> {
    if state.index() < seeds.len() {
        Ok(())
    } else {
        Err(BuildError::UnknownState { state })
    }
}

fn submachine_def<'a, C: 'static>(
    seeds: &'a [NodeSeed<C>],
    owner: StateId,
) -> Result<&'a Arc<MachineDef<C>>, BuildError> {
    check_state(seeds, owner)?;
    match &seeds[owner.index()].kind {
        NodeSeedKind::Submachine { def } => Ok(def),
        _ => Err(BuildError::NotASubmachine { state: owner }),
    }
}

fn resolve_source<C: 'static>(
    seeds: &[NodeSeed<C>],
    source: SourceRef,
    event: TypeKey,
) -> Result<(StateId, Option<StateId>), BuildError> {
    match source {
        SourceRef::State(state) => {
            check_state(seeds, state)?;
            Ok((state, None))
        }
        SourceRef::ExitPoint { owner, exit } => {
            let child = submachine_def(seeds, owner)?;
            let Some(seed) = child.seeds.get(exit.index()) else {
                return Err(BuildError::UnknownExitPoint { owner, exit });
            };
            let NodeSeedKind::ExitPoint { event: forwarded } = &seed.kind else {
                return Err(BuildError::UnknownExitPoint { owner, exit });
            };
            if *forwarded != event {
                return Err(BuildError::ExitPointEventMismatch {
                    expected: forwarded.name().to_string(),
                    found: event.name().to_string(),
                });
            }
            Ok((owner, Some(exit)))
        }
    }
}

fn resolve_target<C: 'static>(
    seeds: &[NodeSeed<C>],
    target: TargetRef,
    event: TypeKey,
) -> Result<ResolvedTarget, BuildError> {
    match target {
        TargetRef::State(state) => {
            check_state(seeds, state)?;
            // A transition into one of this machine's own exit points can
            // only forward its own trigger.
            if let NodeSeedKind::ExitPoint { event: forwarded } = &seeds[state.index()].kind {
                if *forwarded != event {
                    return Err(BuildError::ExitPointEventMismatch {
                        expected: forwarded.name().to_string(),
                        found: event.name().to_string(),
                    });
                }
            }
            Ok(ResolvedTarget::State(state))
        }
        TargetRef::EntryPoint { owner, entry } => {
            let child = submachine_def(seeds, owner)?;
            let Some(seed) = child.seeds.get(entry.index()) else {
                return Err(BuildError::UnknownEntryPoint { owner, entry });
            };
            let NodeSeedKind::EntryPoint { region } = seed.kind else {
                return Err(BuildError::UnknownEntryPoint { owner, entry });
            };
            Ok(ResolvedTarget::Composite {
                owner,
                targets: smallvec![(region, entry)],
                via_entry_point: true,
            })
        }
        TargetRef::Direct { owner, targets } => {
            let child = submachine_def(seeds, owner)?;
            if targets.is_empty() {
                return Err(BuildError::EmptyDirectEntry { owner });
            }
            let mut resolved: SmallVec<[(RegionId, StateId); 2]> = SmallVec::new();
            for (region, state) in targets {
                if region.index() >= child.region_count() {
                    return Err(BuildError::UnknownRegion {
                        region,
                        regions: child.region_count(),
                    });
                }
                let Some(seed) = child.seeds.get(state.index()) else {
                    return Err(BuildError::UnknownState { state });
                };
                match seed.kind {
                    NodeSeedKind::State { .. } | NodeSeedKind::Submachine { .. } => {}
                    _ => return Err(BuildError::DirectEntryIntoPseudoState { owner, state }),
                }
                if resolved.iter().any(|(seen, _)| *seen == region) {
                    return Err(BuildError::DuplicateForkRegion { owner, region });
                }
                resolved.push((region, state));
            }
            Ok(ResolvedTarget::Composite {
                owner,
                targets: resolved,
                via_entry_point: false,
            })
        }
    }
}
