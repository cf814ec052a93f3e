//! Flags: boolean properties attached to subsets of states.

use std::any::TypeId;
use std::fmt;

/// Marker trait for flag types.
///
/// A flag is a zero-sized marker type; states advertise membership through
/// [`crate::StateBehavior::flags`] and callers query the current
/// configuration with [`crate::Machine::is_flag_active`].
///
/// By default a flag query forwards into nested machines when a composite
/// state does not declare the flag itself. Override
/// [`FORWARD_TO_SUBMACHINES`](Flag::FORWARD_TO_SUBMACHINES) with `false`
/// for a non-forwarding flag.
pub trait Flag: 'static {
    /// Whether composite states that do not declare this flag delegate
    /// the lookup to their nested machine.
    const FORWARD_TO_SUBMACHINES: bool = true;
}

/// Stable runtime identity of a flag type.
#[derive(Copy, Clone)]
pub struct FlagKey {
    id: TypeId,
    name: &'static str,
}

impl FlagKey {
    /// The key for a flag type.
    pub fn of<F: Flag>() -> Self {
        Self {
            id: TypeId::of::<F>(),
            name: std::any::type_name::<F>(),
        }
    }

    /// Full type name of the flag behind this key.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for FlagKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FlagKey {}

impl std::hash::Hash for FlagKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for FlagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.name.rsplit("::").next().unwrap_or(self.name);
        write!(f, "FlagKey({short})")
    }
}

/// Built-in flag: while any active state declares it, the machine swallows
/// every event without dispatching.
pub struct TerminateFlag;

impl Flag for TerminateFlag {}

/// Built-in flag: while any active state declares it, the machine swallows
/// every event except the state's declared end-of-interrupt event (see
/// [`crate::StateBehavior::interrupt_until`]).
pub struct InterruptFlag;

impl Flag for InterruptFlag {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loaded;
    impl Flag for Loaded {}

    struct Local;
    impl Flag for Local {
        const FORWARD_TO_SUBMACHINES: bool = false;
    }

    #[test]
    fn keys_compare_by_type() {
        assert_eq!(FlagKey::of::<Loaded>(), FlagKey::of::<Loaded>());
        assert_ne!(FlagKey::of::<Loaded>(), FlagKey::of::<Local>());
    }

    #[test]
    fn forwarding_defaults_on() {
        assert!(Loaded::FORWARD_TO_SUBMACHINES);
        assert!(!Local::FORWARD_TO_SUBMACHINES);
    }
}
