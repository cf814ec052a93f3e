//! Type-erased event envelopes.
//!
//! Every event that crosses a dispatch-table boundary travels inside an
//! [`Envelope`]: the value itself plus a stable per-type [`TypeKey`] used
//! for runtime lookup. Envelopes are cheap to clone (events must be
//! `Clone` so they can be parked in the deferred and message queues).

use std::any::{Any, TypeId};
use std::fmt;

use smallvec::SmallVec;

use super::state::{RegionId, StateId};

/// Marker trait for event types.
///
/// Blanket-implemented for every `'static + Send + Clone` type, so plain
/// structs and enums work without any ceremony:
///
/// ```rust
/// use machina::Envelope;
///
/// #[derive(Clone, Debug)]
/// struct Play;
///
/// let envelope = Envelope::new(Play);
/// assert!(envelope.downcast::<Play>().is_some());
/// ```
pub trait Event: Any + Send + Clone {}

impl<T: Any + Send + Clone> Event for T {}

/// Stable runtime identity of an event type.
///
/// Equality and hashing use the underlying `TypeId` only; the captured
/// type name exists for logging and diagnostics.
#[derive(Copy, Clone)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// The key for an event type.
    pub fn of<E: Event>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
        }
    }

    /// Full type name of the event type behind this key.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Short name: the last path segment of [`TypeKey::name`].
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.short_name())
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Object-safe view of a stored event value.
trait ErasedEvent: Any + Send {
    fn clone_boxed(&self) -> Box<dyn ErasedEvent>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Event> ErasedEvent for T {
    fn clone_boxed(&self) -> Box<dyn ErasedEvent> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased event plus its type key.
///
/// Pure value wrapper: wrapping never fails, downcasting never panics.
pub struct Envelope {
    key: TypeKey,
    value: Box<dyn ErasedEvent>,
}

impl Envelope {
    /// Wrap an event value.
    pub fn new<E: Event>(event: E) -> Self {
        Self {
            key: TypeKey::of::<E>(),
            value: Box::new(event),
        }
    }

    /// The stored event's type key. O(1).
    pub fn type_key(&self) -> TypeKey {
        self.key
    }

    /// True if the stored event is an `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.key == TypeKey::of::<E>()
    }

    /// Borrow the stored event as an `E`, or `None` if the types differ.
    pub fn downcast<E: Event>(&self) -> Option<&E> {
        self.value.as_any().downcast_ref::<E>()
    }
}

impl Clone for Envelope {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            value: self.value.clone_boxed(),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Envelope").field(&self.key.short_name()).finish()
    }
}

/// Event used by [`crate::Machine::start`] when the caller supplies none.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Starting;

/// Event used by [`crate::Machine::stop`] when the caller supplies none.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stopping;

/// Wrapper event carried into a composite state on direct entry, fork, or
/// entry-point routing. The nested entry logic recognizes it and activates
/// the requested sub-states instead of the declared initial configuration.
#[derive(Clone, Debug)]
pub(crate) struct DirectEnter {
    /// Requested `(region, state)` pairs inside the target submachine.
    pub targets: SmallVec<[(RegionId, StateId); 2]>,
    /// Entry through a pseudo entry point: after activation, the trigger
    /// event is re-processed inside the submachine so the entry point's
    /// outgoing transition can fire.
    pub via_entry_point: bool,
    /// The event that triggered the transition.
    pub inner: Envelope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Ping(u32);

    #[derive(Clone, Debug)]
    struct Pong;

    #[test]
    fn wrap_and_downcast_round_trip() {
        let envelope = Envelope::new(Ping(7));
        assert_eq!(envelope.downcast::<Ping>(), Some(&Ping(7)));
    }

    #[test]
    fn downcast_wrong_type_returns_none() {
        let envelope = Envelope::new(Ping(7));
        assert!(envelope.downcast::<Pong>().is_none());
        assert!(!envelope.is::<Pong>());
    }

    #[test]
    fn type_key_is_stable_per_type() {
        assert_eq!(TypeKey::of::<Ping>(), TypeKey::of::<Ping>());
        assert_ne!(TypeKey::of::<Ping>(), TypeKey::of::<Pong>());
        assert_eq!(Envelope::new(Ping(1)).type_key(), TypeKey::of::<Ping>());
    }

    #[test]
    fn clone_preserves_value_and_key() {
        let envelope = Envelope::new(Ping(42));
        let copy = envelope.clone();
        assert_eq!(copy.type_key(), envelope.type_key());
        assert_eq!(copy.downcast::<Ping>(), Some(&Ping(42)));
    }

    #[test]
    fn short_name_trims_module_path() {
        assert_eq!(TypeKey::of::<Ping>().short_name(), "Ping");
    }
}
