// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Quarantine state machine and exclusion set.
//!
//! A data file that can no longer be trusted leaves the queue through the
//! first step that succeeds:
//!
//! ```text
//! Active ──► move to Poison ──► Quarantined
//!                 │ failed
//!                 ▼
//!              delete ──► Deleted
//!                 │ failed
//!                 ▼
//!           exclusion set ──► Excluded (still on disk, skipped by scans)
//! ```
//!
//! Files removed on purpose (commit, clear) enter at the delete step and fall
//! back to the move. A file that vanished during any step is `AlreadyGone`.
//!
//! Scans quarantine under shared grants, so several callers can meet the same
//! bad file. The move steps run one at a time behind a gate, and a file that
//! is already out of the data directory is left alone once inside it.

use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{fs::FileSystem, lock::QueueLock, metrics};

/// How a file left (or failed to leave) the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineOutcome {
    /// Moved to the poison directory.
    Quarantined,
    Deleted,
    /// Neither moved nor deleted; skipped by future scans.
    Excluded,
    /// The file no longer existed.
    AlreadyGone,
}

impl QuarantineOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quarantined => "quarantined",
            Self::Deleted => "deleted",
            Self::Excluded => "excluded",
            Self::AlreadyGone => "already_gone",
        }
    }
}

/// Data file names that could be neither quarantined nor deleted.
#[derive(Debug)]
pub(crate) struct ExclusionSet {
    names:     Mutex<HashSet<String>>,
    last_heal: Mutex<Instant>,
}

impl ExclusionSet {
    pub(crate) fn new() -> Self {
        Self {
            names:     Mutex::new(HashSet::new()),
            last_heal: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn insert(&self, name: &str) { self.names.lock().insert(name.to_owned()); }

    pub(crate) fn is_empty(&self) -> bool { self.names.lock().is_empty() }

    /// Sorted copy of the current set.
    pub(crate) fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.lock().iter().cloned().collect();
        names.sort();
        names
    }

    /// Drops names from `listing` that are excluded, and sorts the rest.
    pub(crate) fn filter_sorted(&self, mut listing: Vec<String>) -> Vec<String> {
        {
            let names = self.names.lock();
            if !names.is_empty() {
                listing.retain(|name| !names.contains(name));
            }
        }
        listing.sort_unstable();
        listing
    }

    /// Whether at least `interval` passed since the last heal.
    pub(crate) fn heal_due(&self, interval: Duration) -> bool {
        !self.is_empty() && self.last_heal.lock().elapsed() >= interval
    }

    /// Removes `gone` and restarts the heal interval.
    fn forget(&self, gone: &[String]) -> usize {
        let mut names = self.names.lock();
        let removed = gone.iter().filter(|name| names.remove(name.as_str())).count();
        *self.last_heal.lock() = Instant::now();
        removed
    }
}

/// Routes untrusted or consumed data files out of the queue.
#[derive(Debug)]
pub(crate) struct Quarantine {
    fs:         Arc<dyn FileSystem>,
    data_dir:   PathBuf,
    poison_dir: PathBuf,
    exclusions: ExclusionSet,
    /// Held in write mode across clear-slot, move and delete.
    gate:       QueueLock,
}

impl Quarantine {
    pub(crate) fn new(
        fs: Arc<dyn FileSystem>,
        data_dir: PathBuf,
        poison_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            fs,
            data_dir,
            poison_dir,
            exclusions: ExclusionSet::new(),
            gate: QueueLock::new(timeout),
        }
    }

    pub(crate) const fn exclusions(&self) -> &ExclusionSet { &self.exclusions }

    fn paths(&self, name: &str) -> (PathBuf, PathBuf) {
        (self.data_dir.join(name), self.poison_dir.join(name))
    }

    fn record(&self, name: &str, outcome: QuarantineOutcome) -> QuarantineOutcome {
        metrics::QUARANTINED
            .with_label_values(&[outcome.as_str()])
            .inc();
        if outcome == QuarantineOutcome::Excluded {
            self.exclusions.insert(name);
            warn!(file = name, "Data file could not be moved or deleted, excluding it");
        }
        outcome
    }

    /// Moves a data file that failed to load into the poison directory.
    ///
    /// If the gate cannot be taken in time the file is excluded instead.
    pub(crate) fn quarantine(&self, name: &str, reason: &str) -> QuarantineOutcome {
        warn!(file = name, reason, "Quarantining data file");
        let Ok(_gate) = self.gate.write() else {
            return self.record(name, QuarantineOutcome::Excluded);
        };
        let (data_path, poison_path) = self.paths(name);
        if known_absent(name, self.fs.try_exists(&data_path)) {
            return self.record(name, QuarantineOutcome::AlreadyGone);
        }

        if self.clear_poison_slot(&poison_path) {
            match self.fs.rename(&data_path, &poison_path) {
                Ok(()) => return self.record(name, QuarantineOutcome::Quarantined),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return self.record(name, QuarantineOutcome::AlreadyGone);
                }
                Err(err) => debug!(file = name, %err, "Move to poison failed"),
            }
        }

        let outcome = match self.fs.delete(&data_path) {
            Ok(()) => QuarantineOutcome::Deleted,
            Err(err) => delete_failure(name, &err),
        };
        self.record(name, outcome)
    }

    /// Removes a consumed or cleared data file, falling back to quarantine if
    /// it cannot be deleted.
    pub(crate) fn discard(&self, name: &str) -> QuarantineOutcome {
        let (data_path, _) = self.paths(name);
        match self.fs.delete(&data_path) {
            Ok(()) => QuarantineOutcome::Deleted,
            Err(err) if err.kind() == io::ErrorKind::NotFound => QuarantineOutcome::AlreadyGone,
            Err(err) => {
                let reason = format!("delete failed: {err}");
                self.quarantine(name, &reason)
            }
        }
    }

    /// Best-effort removal of a same-named poison file. Returns whether the
    /// slot is free for a move.
    fn clear_poison_slot(&self, poison_path: &Path) -> bool {
        if matches!(self.fs.try_exists(poison_path), Ok(false)) {
            return true;
        }
        slot_cleared(poison_path, self.fs.delete(poison_path))
    }

    pub(crate) async fn quarantine_async(&self, name: &str, reason: &str) -> QuarantineOutcome {
        warn!(file = name, reason, "Quarantining data file");
        let Ok(_gate) = self.gate.write_async().await else {
            return self.record(name, QuarantineOutcome::Excluded);
        };
        let (data_path, poison_path) = self.paths(name);
        if known_absent(name, self.fs.try_exists_async(&data_path).await) {
            return self.record(name, QuarantineOutcome::AlreadyGone);
        }

        if self.clear_poison_slot_async(&poison_path).await {
            match self.fs.rename_async(&data_path, &poison_path).await {
                Ok(()) => return self.record(name, QuarantineOutcome::Quarantined),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return self.record(name, QuarantineOutcome::AlreadyGone);
                }
                Err(err) => debug!(file = name, %err, "Move to poison failed"),
            }
        }

        let outcome = match self.fs.delete_async(&data_path).await {
            Ok(()) => QuarantineOutcome::Deleted,
            Err(err) => delete_failure(name, &err),
        };
        self.record(name, outcome)
    }

    pub(crate) async fn discard_async(&self, name: &str) -> QuarantineOutcome {
        let (data_path, _) = self.paths(name);
        match self.fs.delete_async(&data_path).await {
            Ok(()) => QuarantineOutcome::Deleted,
            Err(err) if err.kind() == io::ErrorKind::NotFound => QuarantineOutcome::AlreadyGone,
            Err(err) => {
                let reason = format!("delete failed: {err}");
                self.quarantine_async(name, &reason).await
            }
        }
    }

    async fn clear_poison_slot_async(&self, poison_path: &Path) -> bool {
        if matches!(self.fs.try_exists_async(poison_path).await, Ok(false)) {
            return true;
        }
        slot_cleared(poison_path, self.fs.delete_async(poison_path).await)
    }

    /// Forgets excluded names whose files are known to be gone. Names that
    /// cannot be checked stay. Returns how many were dropped.
    pub(crate) fn heal(&self) -> usize {
        if self.exclusions.is_empty() {
            return 0;
        }
        let gone: Vec<String> = self
            .exclusions
            .snapshot()
            .into_iter()
            .filter(|name| known_absent(name, self.fs.try_exists(&self.data_dir.join(name))))
            .collect();
        self.log_healed(self.exclusions.forget(&gone))
    }

    pub(crate) async fn heal_async(&self) -> usize {
        if self.exclusions.is_empty() {
            return 0;
        }
        let mut gone = Vec::new();
        for name in self.exclusions.snapshot() {
            let exists = self.fs.try_exists_async(&self.data_dir.join(&name)).await;
            if known_absent(&name, exists) {
                gone.push(name);
            }
        }
        self.log_healed(self.exclusions.forget(&gone))
    }

    fn log_healed(&self, healed: usize) -> usize {
        if healed > 0 {
            info!(
                healed,
                remaining = self.exclusions.snapshot().len(),
                "Healed exclusion set"
            );
        }
        healed
    }
}

/// Whether a stat result proves the file is absent.
fn known_absent(name: &str, exists: io::Result<bool>) -> bool {
    match exists {
        Ok(exists) => !exists,
        Err(err) => {
            debug!(file = name, %err, "Could not stat data file");
            false
        }
    }
}

fn slot_cleared(poison_path: &Path, deleted: io::Result<()>) -> bool {
    match deleted {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            debug!(path = ?poison_path, %err, "Could not replace existing poison file");
            false
        }
    }
}

fn delete_failure(name: &str, err: &io::Error) -> QuarantineOutcome {
    if err.kind() == io::ErrorKind::NotFound {
        QuarantineOutcome::AlreadyGone
    } else {
        debug!(file = name, %err, "Delete failed");
        QuarantineOutcome::Excluded
    }
}
