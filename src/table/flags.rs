//! The per-flag lookup table.
//!
//! For every flag declared by any state, one cell per state answers "is
//! the flag active when this state is active". Composite states that do
//! not declare a flag get a forward cell: the query recurses into the
//! nested machine unless the flag opts out of forwarding.

use std::collections::HashMap;

use super::MachineDef;
use crate::core::FlagKey;
use crate::core::StateId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum FlagCell {
    Active,
    Inactive,
    Forward,
}

pub(crate) struct FlagTable {
    cells: HashMap<FlagKey, Box<[FlagCell]>>,
    /// Cells used for flags no state declares: inactive everywhere,
    /// forwarding at composite states.
    default_cells: Box<[FlagCell]>,
}

impl FlagTable {
    pub fn build<C: 'static>(def: &MachineDef<C>) -> Self {
        let default_cells: Box<[FlagCell]> = def
            .seeds
            .iter()
            .map(|seed| {
                if seed.is_submachine() {
                    FlagCell::Forward
                } else {
                    FlagCell::Inactive
                }
            })
            .collect();

        let mut cells: HashMap<FlagKey, Box<[FlagCell]>> = HashMap::new();
        for (index, seed) in def.seeds.iter().enumerate() {
            for &flag in seed.meta.flags.iter() {
                let entry = cells
                    .entry(flag)
                    .or_insert_with(|| default_cells.clone());
                entry[index] = FlagCell::Active;
            }
        }

        Self {
            cells,
            default_cells,
        }
    }

    pub fn cell(&self, flag: FlagKey, state: StateId) -> FlagCell {
        self.cells
            .get(&flag)
            .unwrap_or(&self.default_cells)[state.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MachineDefBuilder;
    use crate::core::{Flag, StateBehavior};
    use crate::table::row::Transition;

    struct Audible;
    impl Flag for Audible {}

    struct Silent;
    impl Flag for Silent {}

    #[derive(Clone)]
    struct Loud;
    impl StateBehavior<()> for Loud {
        fn flags(&self) -> Vec<FlagKey> {
            vec![FlagKey::of::<Audible>()]
        }
    }

    #[derive(Clone)]
    struct Quiet;
    impl StateBehavior<()> for Quiet {}

    #[derive(Clone, Debug)]
    struct Toggle;

    #[test]
    fn declared_flags_mark_their_states() {
        let mut builder = MachineDefBuilder::new("volume");
        let loud = builder.state(|| Loud);
        let quiet = builder.state(|| Quiet);
        builder.initial(loud);
        builder.transition(Transition::<(), Toggle>::external(loud, quiet));
        let def = builder.build().unwrap();

        let table = FlagTable::build(&def);
        assert_eq!(table.cell(FlagKey::of::<Audible>(), loud), FlagCell::Active);
        assert_eq!(table.cell(FlagKey::of::<Audible>(), quiet), FlagCell::Inactive);
        // Undeclared flags fall back to the default cells.
        assert_eq!(table.cell(FlagKey::of::<Silent>(), loud), FlagCell::Inactive);
    }
}
