//! Build errors for machine definitions.

use thiserror::Error;

use crate::core::{RegionId, StateId};

/// Errors detected while building a machine definition.
///
/// These are static wiring bugs, not runtime conditions: a definition
/// that builds successfully never produces them again.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Initial state not specified. Call .initial(state) before .build()")]
    MissingInitialState,

    #[error("No transitions defined. Add at least one transition")]
    NoTransitions,

    #[error("Unknown state {state} referenced by a transition or initial entry")]
    UnknownState { state: StateId },

    #[error("Region {region} out of range: the machine declares {regions} region(s)")]
    UnknownRegion { region: RegionId, regions: usize },

    #[error("State {state} cannot be an initial state: pseudo states never start a region")]
    InvalidInitialState { state: StateId },

    #[error("State {state} is not a submachine")]
    NotASubmachine { state: StateId },

    #[error("State {entry} is not an entry point of submachine {owner}")]
    UnknownEntryPoint { owner: StateId, entry: StateId },

    #[error("State {exit} is not an exit point of submachine {owner}")]
    UnknownExitPoint { owner: StateId, exit: StateId },

    #[error("Exit point forwards {expected}, but the transition is declared on {found}")]
    ExitPointEventMismatch { expected: String, found: String },

    #[error("Direct entry into {owner} lists no target states")]
    EmptyDirectEntry { owner: StateId },

    #[error("Direct entry into {owner} targets pseudo state {state}")]
    DirectEntryIntoPseudoState { owner: StateId, state: StateId },

    #[error("Fork into {owner} targets region {region} more than once")]
    DuplicateForkRegion { owner: StateId, region: RegionId },
}
