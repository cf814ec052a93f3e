//! The per-state dispatch table.
//!
//! Built once per machine definition and shared immutably across every
//! instance of that definition. Slot 0 is reserved for the machine's own
//! internal transition table; slot `id + 1` belongs to the state with
//! that id.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use super::row::Row;
use super::MachineDef;
use crate::core::TypeKey;

/// Ordered candidate rows for one `(state, event type)` pair.
///
/// Rows are kept in reverse declaration order: later-declared rows are
/// tried first, which gives last-match-wins priority for guard
/// fallthrough chains.
pub(crate) struct Chain<C> {
    pub rows: SmallVec<[Arc<Row<C>>; 2]>,
}

impl<C> Default for Chain<C> {
    fn default() -> Self {
        Self {
            rows: SmallVec::new(),
        }
    }
}

/// Dispatch data for a single state (or for the machine itself, slot 0).
pub(crate) struct StateTable<C> {
    pub chains: HashMap<TypeKey, Chain<C>>,
    /// Composite states dispatch into their submachine before consulting
    /// their own chains.
    pub call_submachine: bool,
}

impl<C> Default for StateTable<C> {
    fn default() -> Self {
        Self {
            chains: HashMap::new(),
            call_submachine: false,
        }
    }
}

pub(crate) struct DispatchTable<C> {
    states: Vec<StateTable<C>>,
}

impl<C: 'static> DispatchTable<C> {
    pub fn build(def: &MachineDef<C>) -> Self {
        let mut states: Vec<StateTable<C>> = Vec::with_capacity(def.state_count() + 1);
        states.resize_with(def.state_count() + 1, StateTable::default);

        for row in &def.rows {
            let slot = row.slot();
            let chain = states[slot].chains.entry(row.event).or_default();
            // Reverse declaration order: the most recently declared row
            // for this (state, event) pair is tried first.
            chain.rows.insert(0, Arc::clone(row));
        }

        for (index, seed) in def.seeds.iter().enumerate() {
            if seed.is_submachine() {
                states[index + 1].call_submachine = true;
            }
        }

        Self { states }
    }

    /// Table for dispatch-table slot `index` (0 = machine-internal).
    pub fn slot(&self, index: usize) -> &StateTable<C> {
        &self.states[index]
    }

    /// The machine's own internal transition table.
    pub fn internal(&self) -> &StateTable<C> {
        &self.states[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MachineDefBuilder;
    use crate::core::{StateBehavior, StateId};
    use crate::table::row::Transition;

    #[derive(Clone)]
    struct A;
    impl StateBehavior<()> for A {}

    #[derive(Clone)]
    struct B;
    impl StateBehavior<()> for B {}

    #[derive(Clone, Debug)]
    struct Go;

    fn two_state_def() -> (MachineDef<()>, StateId, StateId) {
        let mut builder = MachineDefBuilder::new("pair");
        let a = builder.state(|| A);
        let b = builder.state(|| B);
        builder.initial(a);
        builder.transition(Transition::<(), Go>::external(a, b).guard(|_, _| false));
        builder.transition(Transition::<(), Go>::external(a, b));
        builder.transition(Transition::<(), Go>::machine_internal());
        (builder.build().unwrap(), a, b)
    }

    #[test]
    fn chains_are_reverse_declaration_order() {
        let (def, a, _) = two_state_def();
        let table = DispatchTable::build(&def);

        let chain = table
            .slot(a.index() + 1)
            .chains
            .get(&TypeKey::of::<Go>())
            .expect("chain for Go");
        assert_eq!(chain.rows.len(), 2);
        // The later-declared (guardless) row comes first.
        assert!(chain.rows[0].guard.is_none());
        assert!(chain.rows[1].guard.is_some());
    }

    #[test]
    fn machine_rows_land_in_slot_zero() {
        let (def, _, b) = two_state_def();
        let table = DispatchTable::build(&def);

        assert!(table.internal().chains.contains_key(&TypeKey::of::<Go>()));
        assert!(table.slot(b.index() + 1).chains.is_empty());
    }

    #[test]
    fn table_is_memoized_per_definition() {
        let (def, _, _) = two_state_def();
        let first = def.dispatch_table();
        let second = def.dispatch_table();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
