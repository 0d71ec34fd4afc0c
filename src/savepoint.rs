//! # Savepoint
//!
//! The tiny piece of persisted state the transactional core consumes at
//! start: the epoch to resume the global clock from. Taking new savepoints
//! (and writing them durably) belongs to the recovery subsystem; the core
//! only reads the restored value and refuses to start from an invalid one.

use parking_lot::RwLock;

use crate::epoch::Epoch;

/// Snapshot of the persisted engine state relevant to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    pub current_epoch: Epoch,
}

impl Savepoint {
    pub fn new(current_epoch: Epoch) -> Savepoint {
        Savepoint { current_epoch }
    }
}

/// Holds the engine's current savepoint.
#[derive(Debug)]
pub struct SavepointManager {
    savepoint: RwLock<Savepoint>,
}

impl SavepointManager {
    pub fn new(initial: Savepoint) -> SavepointManager {
        SavepointManager {
            savepoint: RwLock::new(initial),
        }
    }

    /// Lock-held copy of the savepoint; cheap enough for the init path.
    pub fn get_savepoint_fast(&self) -> Savepoint {
        *self.savepoint.read()
    }

    /// Records a new savepoint epoch. Called by recovery, not by the core.
    pub fn take_savepoint(&self, current_epoch: Epoch) {
        debug_assert!(current_epoch.is_valid());
        self.savepoint.write().current_epoch = current_epoch;
    }
}
