//! Serializable snapshots of a machine's dynamic configuration.
//!
//! A snapshot captures what is *running*: active state ids per region,
//! history, and the same for every nested machine. It does not capture
//! user state held inside state values or contexts, and it does not
//! capture parked events; restoring re-establishes the configuration
//! without running entry or exit callbacks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::StateId;
use crate::machine::node::NodeKind;
use crate::machine::{Machine, MachineCore};

/// Version identifier for the snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Errors from snapshot serialization and restore.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Serialization to JSON or binary format failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Deserialization from JSON or binary format failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Snapshot version is not supported by this version
    #[error("Unsupported snapshot version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Snapshot was taken from a differently named definition
    #[error("Snapshot is for machine '{found}', expected '{expected}'")]
    MachineMismatch { expected: String, found: String },

    /// Snapshot region count does not match the definition
    #[error("Snapshot holds {found} region(s), the machine declares {expected}")]
    RegionCountMismatch { expected: usize, found: usize },

    /// Snapshot references a state id outside the definition
    #[error("Snapshot references invalid state {state}")]
    InvalidState { state: StateId },

    /// Snapshot nests a child under a state that is not a submachine
    #[error("Snapshot nests a machine under {state}, which is not a submachine")]
    NotASubmachine { state: StateId },
}

/// Serializable capture of one machine level plus its nested machines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    /// Snapshot format version.
    pub version: u32,
    /// Name of the definition the snapshot was taken from.
    pub machine: String,
    /// Whether the machine was running.
    pub running: bool,
    /// Active state ids, one per region.
    pub active: Vec<StateId>,
    /// Last-active configuration, when the history policy records one.
    pub history: Option<Vec<StateId>>,
    /// Snapshots of nested machines, keyed by their composite state id.
    pub children: Vec<(StateId, MachineSnapshot)>,
}

impl MachineSnapshot {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|err| SnapshotError::SerializationFailed(err.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(json).map_err(|err| SnapshotError::DeserializationFailed(err.to_string()))
    }

    /// Serialize to a compact binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|err| SnapshotError::SerializationFailed(err.to_string()))
    }

    /// Deserialize from the binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        bincode::deserialize(bytes)
            .map_err(|err| SnapshotError::DeserializationFailed(err.to_string()))
    }
}

impl<C: 'static> Machine<C> {
    /// Capture the current dynamic configuration.
    pub fn snapshot(&self) -> MachineSnapshot {
        self.core.snapshot()
    }

    /// Re-establish a previously captured configuration.
    ///
    /// The whole snapshot is validated against the definition tree before
    /// anything is mutated. Entry and exit callbacks do not run; parked
    /// events (deferred and message queues) are discarded.
    pub fn restore(&mut self, snapshot: &MachineSnapshot) -> Result<(), SnapshotError> {
        self.core.validate_snapshot(snapshot)?;
        self.core.apply_snapshot(snapshot);
        Ok(())
    }
}

impl<C: 'static> MachineCore<C> {
    pub(crate) fn snapshot(&self) -> MachineSnapshot {
        let children = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| {
                node.submachine()
                    .map(|core| (StateId::new(index as u16), core.snapshot()))
            })
            .collect();
        MachineSnapshot {
            version: SNAPSHOT_VERSION,
            machine: self.def.name.clone(),
            running: self.running,
            active: self.active.to_vec(),
            history: if self.history.records_history() {
                Some(self.history.last_active().to_vec())
            } else {
                None
            },
            children,
        }
    }

    fn validate_snapshot(&self, snapshot: &MachineSnapshot) -> Result<(), SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        if snapshot.machine != self.def.name {
            return Err(SnapshotError::MachineMismatch {
                expected: self.def.name.clone(),
                found: snapshot.machine.clone(),
            });
        }
        if snapshot.active.len() != self.def.region_count() {
            return Err(SnapshotError::RegionCountMismatch {
                expected: self.def.region_count(),
                found: snapshot.active.len(),
            });
        }
        let ids = snapshot
            .active
            .iter()
            .chain(snapshot.history.iter().flatten());
        for &state in ids {
            if state.index() >= self.nodes.len() {
                return Err(SnapshotError::InvalidState { state });
            }
        }
        for (state, child) in &snapshot.children {
            let node = self
                .nodes
                .get(state.index())
                .ok_or(SnapshotError::InvalidState { state: *state })?;
            match node.submachine() {
                Some(core) => core.validate_snapshot(child)?,
                None => return Err(SnapshotError::NotASubmachine { state: *state }),
            }
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: &MachineSnapshot) {
        self.active = snapshot.active.iter().copied().collect();
        self.running = snapshot.running;
        if let Some(history) = &snapshot.history {
            self.history.restore_last(history);
        }
        self.deferred.clear();
        self.queue.clear();
        self.forwards.clear();
        self.event_processing = false;
        for (state, child) in &snapshot.children {
            if let NodeKind::Machine(core) = &mut self.nodes[state.index()].kind {
                core.apply_snapshot(child);
            }
        }
    }
}
