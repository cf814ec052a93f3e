//! The frozen machine definition and its derived lookup tables.
//!
//! A [`MachineDef`] is the immutable output of the builder: declared
//! states, resolved transition rows, regions, history policy, hooks. The
//! dispatch table and flag table are derived from it lazily, once,
//! thread-safely, and shared across every machine instance created from
//! the same definition.

mod dispatch;
mod flags;
pub(crate) mod row;

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use smallvec::SmallVec;

pub use row::{SourceRef, TargetRef, Transition};

pub(crate) use dispatch::{Chain, DispatchTable, StateTable};
pub(crate) use flags::{FlagCell, FlagTable};
pub(crate) use row::{ActionFn, GuardFn, ResolvedTarget, Row, RowDef, RowDefKind, RowExec};

use crate::core::{ActionError, Envelope, FlagKey, RegionId, StateId, TypeKey};
use crate::machine::history::HistoryPolicy;
use crate::machine::node::ErasedState;
use crate::machine::queue::QueueOrder;

/// Hook invoked once per active region when no row matched a directly
/// raised event.
pub(crate) type NoTransitionFn<C> = Arc<dyn Fn(&Envelope, &mut C, StateId) + Send + Sync>;

/// Hook invoked when an action or entry/exit callback fails.
pub(crate) type ActionErrorHookFn<C> = Arc<dyn Fn(&Envelope, &mut C, &ActionError) + Send + Sync>;

/// Constructor for state nodes, captured at declaration time.
pub(crate) type MakeNodeFn<C> = Arc<dyn Fn() -> Box<dyn ErasedState<C>> + Send + Sync>;

/// The machine's completion ("anonymous") event, processed after every
/// handled event.
pub(crate) struct CompletionDef {
    pub key: TypeKey,
    pub make: Arc<dyn Fn() -> Envelope + Send + Sync>,
}

/// Static description of one state, shared by every machine instance.
pub(crate) struct NodeMeta {
    pub name: String,
    pub type_id: Option<TypeId>,
    pub deferred: Box<[TypeKey]>,
    pub flags: Box<[FlagKey]>,
    pub interrupt_end: Option<TypeKey>,
    pub terminate: bool,
}

pub(crate) enum NodeSeedKind<C> {
    State { make: MakeNodeFn<C> },
    Submachine { def: Arc<MachineDef<C>> },
    EntryPoint { region: RegionId },
    ExitPoint { event: TypeKey },
}

pub(crate) struct NodeSeed<C> {
    pub kind: NodeSeedKind<C>,
    pub meta: Arc<NodeMeta>,
}

impl<C> NodeSeed<C> {
    pub fn is_submachine(&self) -> bool {
        matches!(self.kind, NodeSeedKind::Submachine { .. })
    }
}

/// An immutable, validated machine definition.
///
/// Build one with [`MachineDefBuilder`](crate::MachineDefBuilder), wrap it
/// in an [`Arc`], and create any number of
/// [`Machine`](crate::Machine) instances from it; the derived dispatch
/// and flag tables are built once and shared.
pub struct MachineDef<C> {
    pub(crate) name: String,
    pub(crate) seeds: Vec<NodeSeed<C>>,
    pub(crate) rows: Vec<Arc<Row<C>>>,
    pub(crate) initial: SmallVec<[StateId; 2]>,
    pub(crate) history: HistoryPolicy,
    pub(crate) queue_order: QueueOrder,
    pub(crate) completion: Option<CompletionDef>,
    pub(crate) internal_events: HashSet<TypeKey>,
    pub(crate) no_transition: Option<NoTransitionFn<C>>,
    pub(crate) action_error_hook: Option<ActionErrorHookFn<C>>,
    pub(crate) entry_hook: Option<ActionFn<C>>,
    pub(crate) exit_hook: Option<ActionFn<C>>,
    pub(crate) has_blocking: bool,
    dispatch: OnceLock<Arc<DispatchTable<C>>>,
    flags: OnceLock<Arc<FlagTable>>,
}

impl<C: 'static> MachineDef<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: String,
        seeds: Vec<NodeSeed<C>>,
        rows: Vec<Arc<Row<C>>>,
        initial: SmallVec<[StateId; 2]>,
        history: HistoryPolicy,
        queue_order: QueueOrder,
        completion: Option<CompletionDef>,
        no_transition: Option<NoTransitionFn<C>>,
        action_error_hook: Option<ActionErrorHookFn<C>>,
        entry_hook: Option<ActionFn<C>>,
        exit_hook: Option<ActionFn<C>>,
    ) -> Self {
        let internal_events = rows
            .iter()
            .filter(|row| matches!(row.exec, RowExec::MachineInternal))
            .map(|row| row.event)
            .collect();
        let has_blocking = seeds.iter().any(|seed| {
            seed.meta.terminate
                || seed.meta.interrupt_end.is_some()
                || match &seed.kind {
                    NodeSeedKind::Submachine { def } => def.has_blocking,
                    _ => false,
                }
        });
        Self {
            name,
            seeds,
            rows,
            initial,
            history,
            queue_order,
            completion,
            internal_events,
            no_transition,
            action_error_hook,
            entry_hook,
            exit_hook,
            has_blocking,
            dispatch: OnceLock::new(),
            flags: OnceLock::new(),
        }
    }

    /// The machine's name, used in logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of declared states (including pseudo states and composites).
    pub fn state_count(&self) -> usize {
        self.seeds.len()
    }

    /// Number of orthogonal regions.
    pub fn region_count(&self) -> usize {
        self.initial.len()
    }

    /// The id a state type was registered under, if any.
    pub fn state_id_of<S: 'static>(&self) -> Option<StateId> {
        let wanted = TypeId::of::<S>();
        self.seeds
            .iter()
            .position(|seed| seed.meta.type_id == Some(wanted))
            .map(|index| StateId::new(index as u16))
    }

    /// The registered name of a state.
    pub fn state_name(&self, state: StateId) -> Option<&str> {
        self.seeds.get(state.index()).map(|seed| seed.meta.name.as_str())
    }

    /// The dispatch table, built on first use and shared across instances.
    pub(crate) fn dispatch_table(&self) -> Arc<DispatchTable<C>> {
        self.dispatch
            .get_or_init(|| Arc::new(DispatchTable::build(self)))
            .clone()
    }

    /// The flag table, built on first use and shared across instances.
    pub(crate) fn flag_table(&self) -> Arc<FlagTable> {
        self.flags
            .get_or_init(|| Arc::new(FlagTable::build(self)))
            .clone()
    }

    pub(crate) fn is_completion(&self, key: TypeKey) -> bool {
        self.completion.as_ref().is_some_and(|c| c.key == key)
    }
}

impl<C> fmt::Debug for MachineDef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineDef")
            .field("name", &self.name)
            .field("states", &self.seeds.len())
            .field("regions", &self.initial.len())
            .field("rows", &self.rows.len())
            .finish_non_exhaustive()
    }
}
