//! Machina: a hierarchical, multi-region state machine engine.
//!
//! A machine is declared once as a [`MachineDef`] (states, orthogonal
//! regions, transition rows, history policy) and run as any number of
//! [`Machine`] instances. Dispatch is table-driven: the definition derives
//! a per-state dispatch table lazily, once, and shares it immutably across
//! every instance.
//!
//! # Core concepts
//!
//! - **States** implement [`StateBehavior`] (entry/exit callbacks,
//!   deferred-event set, flags), or are nested machines ("composite"
//!   states) built from their own definitions.
//! - **Events** are plain `'static + Send + Clone` values, carried across
//!   table boundaries in type-erased [`Envelope`]s.
//! - **Regions**: one active state per region, all regions dispatch every
//!   event.
//! - **Queues**: events raised mid-processing go to a FIFO message queue;
//!   events a state defers wait in the deferred queue until the
//!   configuration accepts them.
//! - **Results**: dispatching reports [`Handled::True`],
//!   [`Handled::False`], [`Handled::GuardReject`] or
//!   [`Handled::Deferred`].
//!
//! # Example
//!
//! ```rust
//! use machina::{Handled, Machine, MachineDefBuilder, StateBehavior, Transition};
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct Stopped;
//! impl StateBehavior<u32> for Stopped {}
//!
//! #[derive(Clone)]
//! struct Playing;
//! impl StateBehavior<u32> for Playing {}
//!
//! #[derive(Clone, Debug)]
//! struct Play;
//! #[derive(Clone, Debug)]
//! struct Stop;
//!
//! let mut builder = MachineDefBuilder::<u32>::new("player");
//! let stopped = builder.state(|| Stopped);
//! let playing = builder.state(|| Playing);
//! builder.initial(stopped);
//! builder.transition(
//!     Transition::<u32, Play>::external(stopped, playing).action(|ctx, _play| {
//!         *ctx.context_mut() += 1;
//!         Ok(())
//!     }),
//! );
//! builder.transition(Transition::<u32, Stop>::external(playing, stopped));
//! let def = Arc::new(builder.build()?);
//!
//! let mut machine = Machine::new(def, 0u32);
//! machine.start()?;
//! assert!(machine.is_state_active::<Stopped>());
//! assert_eq!(machine.process_event(Play)?, Handled::True);
//! assert!(machine.is_state_active::<Playing>());
//! assert_eq!(*machine.context(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Concurrency
//!
//! Single-threaded, synchronous, non-preemptive. Reentrancy is modeled
//! explicitly: a `post` from inside a callback enqueues instead of
//! recursing. Multi-threaded use requires an external mutex around the
//! whole machine.

pub mod builder;
pub mod core;
pub mod machine;
pub mod snapshot;
pub mod table;

pub use crate::builder::{BuildError, MachineDefBuilder};
pub use crate::core::{
    ActionError, Envelope, Event, EventCtx, Flag, FlagKey, Handled, InterruptFlag, RegionId,
    Starting, StateBehavior, StateId, Stopping, TerminateFlag, TypeKey,
};
pub use crate::machine::{HistoryPolicy, Machine, QueueOrder, StateRef};
pub use crate::snapshot::{MachineSnapshot, SnapshotError, SNAPSHOT_VERSION};
pub use crate::table::{MachineDef, SourceRef, TargetRef, Transition};
