//! Value-level building blocks of the engine.
//!
//! This module contains the pieces every other layer is written in terms
//! of: type-erased event envelopes, state and region identities, the
//! state capability trait, flags, dispatch results, and the execution
//! context handed to callbacks.

mod context;
mod error;
mod event;
mod flag;
mod handled;
mod state;

pub use context::EventCtx;
pub use error::ActionError;
pub use event::{Envelope, Event, Starting, Stopping, TypeKey};
pub use flag::{Flag, FlagKey, InterruptFlag, TerminateFlag};
pub use handled::Handled;
pub use state::{RegionId, StateBehavior, StateId};

pub(crate) use event::DirectEnter;
pub(crate) use handled::EventSource;
