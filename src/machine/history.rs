//! Shallow-history policies and the per-machine tracker.

use smallvec::SmallVec;

use crate::core::{StateId, TypeKey};

/// What a machine remembers about its last-active configuration across an
/// exit/re-entry cycle.
#[derive(Clone, Debug, Default)]
pub enum HistoryPolicy {
    /// Re-entry activates the declared initial configuration. Exiting
    /// discards any still-deferred events.
    #[default]
    None,
    /// Re-entry restores the last-active configuration regardless of the
    /// triggering event. Deferred events survive the exit.
    AlwaysShallow,
    /// Re-entry restores the last-active configuration only when triggered
    /// by one of the listed event types; other entries use the declared
    /// initial configuration. Deferred events survive the exit only for
    /// the listed events.
    ShallowOn(Vec<TypeKey>),
}

pub(crate) type Configuration = SmallVec<[StateId; 2]>;

/// Records the last-active configuration per region and answers what a
/// re-entry should activate.
#[derive(Clone, Debug)]
pub(crate) struct HistoryTracker {
    policy: HistoryPolicy,
    initial: Configuration,
    last: Configuration,
}

impl HistoryTracker {
    pub fn new(policy: HistoryPolicy, initial: &[StateId]) -> Self {
        Self {
            policy,
            initial: Configuration::from_slice(initial),
            last: Configuration::from_slice(initial),
        }
    }

    /// The configuration to activate on entry triggered by `event`.
    pub fn on_entry(&self, event: TypeKey) -> &Configuration {
        match &self.policy {
            HistoryPolicy::None => &self.initial,
            HistoryPolicy::AlwaysShallow => &self.last,
            HistoryPolicy::ShallowOn(events) => {
                if events.contains(&event) {
                    &self.last
                } else {
                    &self.initial
                }
            }
        }
    }

    /// Snapshot the configuration on exit.
    pub fn on_exit(&mut self, active: &[StateId]) {
        match self.policy {
            HistoryPolicy::None => {}
            HistoryPolicy::AlwaysShallow | HistoryPolicy::ShallowOn(_) => {
                self.last = Configuration::from_slice(active);
            }
        }
    }

    /// Whether deferred events survive an exit triggered by `event`.
    pub fn keeps_deferred_events(&self, event: TypeKey) -> bool {
        match &self.policy {
            HistoryPolicy::None => false,
            HistoryPolicy::AlwaysShallow => true,
            HistoryPolicy::ShallowOn(events) => events.contains(&event),
        }
    }

    pub fn last_active(&self) -> &Configuration {
        &self.last
    }

    /// Whether this policy records anything on exit.
    pub fn records_history(&self) -> bool {
        !matches!(self.policy, HistoryPolicy::None)
    }

    pub fn restore_last(&mut self, last: &[StateId]) {
        self.last = Configuration::from_slice(last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Open;
    #[derive(Clone)]
    struct Close;

    fn ids(raw: &[u16]) -> Vec<StateId> {
        raw.iter().map(|&r| StateId::new(r)).collect()
    }

    #[test]
    fn no_history_always_restores_initial() {
        let initial = ids(&[0, 2]);
        let mut tracker = HistoryTracker::new(HistoryPolicy::None, &initial);
        tracker.on_exit(&ids(&[1, 3]));
        assert_eq!(tracker.on_entry(TypeKey::of::<Open>()).as_slice(), &initial[..]);
        assert!(!tracker.keeps_deferred_events(TypeKey::of::<Open>()));
    }

    #[test]
    fn always_shallow_restores_last_active() {
        let initial = ids(&[0]);
        let mut tracker = HistoryTracker::new(HistoryPolicy::AlwaysShallow, &initial);
        tracker.on_exit(&ids(&[4]));
        assert_eq!(tracker.on_entry(TypeKey::of::<Open>()).as_slice(), &ids(&[4])[..]);
        assert!(tracker.keeps_deferred_events(TypeKey::of::<Open>()));
    }

    #[test]
    fn shallow_on_is_event_selective() {
        let initial = ids(&[0]);
        let policy = HistoryPolicy::ShallowOn(vec![TypeKey::of::<Open>()]);
        let mut tracker = HistoryTracker::new(policy, &initial);
        tracker.on_exit(&ids(&[2]));

        assert_eq!(tracker.on_entry(TypeKey::of::<Open>()).as_slice(), &ids(&[2])[..]);
        assert_eq!(tracker.on_entry(TypeKey::of::<Close>()).as_slice(), &initial[..]);
        assert!(tracker.keeps_deferred_events(TypeKey::of::<Open>()));
        assert!(!tracker.keeps_deferred_events(TypeKey::of::<Close>()));
    }
}
