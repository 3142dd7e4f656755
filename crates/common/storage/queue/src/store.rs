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

//! Durable queue core.
//!
//! [`QueueStore`] owns the `Data` and `Poison` directories and provides the
//! locked primitives that concrete queues are built from:
//! - [`save`](QueueStore::save): persist one item as a new data file
//! - [`load_oldest`](QueueStore::load_oldest): find the oldest readable item,
//!   optionally committing it
//! - [`process_oldest`](QueueStore::process_oldest) and
//!   [`process_while`](QueueStore::process_while): hand items to a caller
//!   action and commit only if it succeeds
//! - [`remove_all`](QueueStore::remove_all): empty the queue
//!
//! ## Ordering
//!
//! Data file names sort in enqueue order (see [`crate::path`]). Each
//! operation lists the directory, drops excluded names and sorts; nothing
//! about the queue contents is cached between operations.
//!
//! ## Transactions
//!
//! The process-then-commit primitives hold an upgradeable read while they
//! scan and while the caller's action runs, so peeks keep working. Only after
//! the action succeeds is the grant upgraded and the files deleted. A failing
//! action leaves every file in place and reports zero commits. Unreadable
//! files met during a scan are quarantined under the upgradeable grant.
//!
//! Every async primitive yields once on entry and checks its
//! [`CancellationToken`] between files and before invoking the action. Once
//! the action has succeeded the delete pass always runs to completion.

use std::{
    fmt::Display,
    future::Future,
    io::{self, Read, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    QueueConfig, Result,
    error::{CancelledSnafu, IoSnafu, SerializeSnafu},
    fs::{FileAccessOutcome, FileSystem},
    lock::QueueLock,
    metrics,
    path::{DATA_EXTENSION, format_timestamp, next_free_name, next_free_name_async},
    quarantine::{Quarantine, QuarantineOutcome},
    serializer::Serializer,
};

/// Disk-backed FIFO storage shared by concrete queue types.
pub struct QueueStore<T, S> {
    config:     QueueConfig,
    fs:         Arc<dyn FileSystem>,
    serializer: S,
    lock:       QueueLock,
    data_dir:   PathBuf,
    poison_dir: PathBuf,
    quarantine: Quarantine,
    _item:      PhantomData<fn() -> T>,
}

impl<T, S> std::fmt::Debug for QueueStore<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("data_dir", &self.data_dir)
            .field("poison_dir", &self.poison_dir)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl<T, S> QueueStore<T, S>
where
    S: Serializer<T>,
{
    /// Opens the queue rooted at `config.root`, creating `Data` and `Poison`
    /// if they are missing.
    pub fn open(config: QueueConfig, fs: Arc<dyn FileSystem>, serializer: S) -> Result<Self> {
        let data_dir = crate::path::data_dir(&config.root);
        let poison_dir = crate::path::poison_dir(&config.root);

        for dir in [&data_dir, &poison_dir] {
            fs.create_dir_all(dir).context(IoSnafu { path: dir.clone() })?;
        }

        let lock = QueueLock::new(config.lock_timeout);
        let quarantine = Quarantine::new(
            fs.clone(),
            data_dir.clone(),
            poison_dir.clone(),
            config.lock_timeout,
        );

        info!(
            root = ?config.root,
            lock_timeout = ?config.lock_timeout,
            sync_writes = config.sync_writes,
            "Queue opened"
        );

        Ok(Self {
            config,
            fs,
            serializer,
            lock,
            data_dir,
            poison_dir,
            quarantine,
            _item: PhantomData,
        })
    }

    pub const fn config(&self) -> &QueueConfig { &self.config }

    pub fn data_dir(&self) -> &Path { &self.data_dir }

    pub fn poison_dir(&self) -> &Path { &self.poison_dir }

    // ------------------------------------------------------------------
    // Enumeration and single-file access
    // ------------------------------------------------------------------

    fn list_raw(&self) -> Result<Vec<String>> {
        self.fs
            .list_files(&self.data_dir, DATA_EXTENSION)
            .context(IoSnafu {
                path: self.data_dir.clone(),
            })
    }

    /// Queue order: data files minus the exclusion set, oldest first.
    fn list(&self) -> Result<Vec<String>> {
        let exclusions = self.quarantine.exclusions();
        if exclusions.heal_due(self.config.heal_interval) {
            self.quarantine.heal();
        }
        Ok(exclusions.filter_sorted(self.list_raw()?))
    }

    async fn list_raw_async(&self) -> Result<Vec<String>> {
        self.fs
            .list_files_async(&self.data_dir, DATA_EXTENSION)
            .await
            .context(IoSnafu {
                path: self.data_dir.clone(),
            })
    }

    async fn list_async(&self) -> Result<Vec<String>> {
        let exclusions = self.quarantine.exclusions();
        if exclusions.heal_due(self.config.heal_interval) {
            self.quarantine.heal_async().await;
        }
        Ok(exclusions.filter_sorted(self.list_raw_async().await?))
    }

    fn decode(&self, bytes: &[u8]) -> FileAccessOutcome<T> {
        let mut reader = bytes;
        match self.serializer.deserialize(&mut reader) {
            Ok(item) => FileAccessOutcome::Ok(item),
            Err(err) => FileAccessOutcome::CorruptData(err),
        }
    }

    /// Reads and deserializes one data file.
    pub fn load(&self, name: &str) -> FileAccessOutcome<T> {
        let path = self.data_dir.join(name);
        let mut bytes = Vec::new();
        let read = self
            .fs
            .open_read(&path)
            .and_then(|mut reader| reader.read_to_end(&mut bytes));
        match read {
            Ok(_) => self.decode(&bytes),
            Err(err) => FileAccessOutcome::from_io_error(err),
        }
    }

    pub async fn load_async(&self, name: &str) -> FileAccessOutcome<T> {
        match self.fs.read_async(&self.data_dir.join(name)).await {
            Ok(bytes) => self.decode(&bytes),
            Err(err) => FileAccessOutcome::from_io_error(err),
        }
    }

    /// Decides what to do with one load attempt during a scan.
    ///
    /// Returns the item if it loaded; quarantines the file if it has to.
    fn triage(&self, name: &str, outcome: FileAccessOutcome<T>) -> Option<T> {
        match outcome {
            FileAccessOutcome::Ok(item) => Some(item),
            FileAccessOutcome::Missing => {
                debug!(file = name, "Data file vanished during scan, skipping");
                None
            }
            outcome @ (FileAccessOutcome::TransientIoError(_)
            | FileAccessOutcome::PermissionDenied(_)
            | FileAccessOutcome::CorruptData(_)) => {
                debug!(file = name, kind = outcome.kind(), "Data file failed to load");
                self.quarantine.quarantine(name, &outcome.to_string());
                None
            }
        }
    }

    async fn triage_async(&self, name: &str, outcome: FileAccessOutcome<T>) -> Option<T> {
        match outcome {
            FileAccessOutcome::Ok(item) => Some(item),
            FileAccessOutcome::Missing => {
                debug!(file = name, "Data file vanished during scan, skipping");
                None
            }
            outcome @ (FileAccessOutcome::TransientIoError(_)
            | FileAccessOutcome::PermissionDenied(_)
            | FileAccessOutcome::CorruptData(_)) => {
                debug!(file = name, kind = outcome.kind(), "Data file failed to load");
                self.quarantine
                    .quarantine_async(name, &outcome.to_string())
                    .await;
                None
            }
        }
    }

    /// Oldest readable item in `names`, quarantining unreadable ones on the
    /// way.
    fn first_valid(&self, names: Vec<String>) -> Option<(String, T)> {
        names.into_iter().find_map(|name| {
            let outcome = self.load(&name);
            self.triage(&name, outcome).map(|item| (name, item))
        })
    }

    async fn first_valid_async(
        &self,
        names: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Option<(String, T)>> {
        for name in names {
            ensure!(!cancel.is_cancelled(), CancelledSnafu);
            let outcome = self.load_async(&name).await;
            if let Some(item) = self.triage_async(&name, outcome).await {
                return Ok(Some((name, item)));
            }
        }
        Ok(None)
    }

    /// Removes consumed files. Failures are routed through quarantine; the
    /// items count as delivered either way.
    fn commit(&self, names: &[String]) -> usize {
        for name in names {
            let outcome = self.quarantine.discard(name);
            debug!(file = %name, outcome = outcome.as_str(), "Committed data file");
        }
        metrics::DEQUEUED.inc_by(names.len() as u64);
        names.len()
    }

    async fn commit_async(&self, names: &[String]) -> usize {
        for name in names {
            let outcome = self.quarantine.discard_async(name).await;
            debug!(file = %name, outcome = outcome.as_str(), "Committed data file");
        }
        metrics::DEQUEUED.inc_by(names.len() as u64);
        names.len()
    }

    fn action_failed(err: &dyn Display, items: usize) {
        metrics::ACTION_FAILURES.inc();
        warn!(items, error = %err, "Queue action failed, nothing committed");
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    fn encode(&self, item: &T) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.serializer
            .serialize(item, &mut bytes)
            .context(SerializeSnafu)?;
        Ok(bytes)
    }

    /// Writes `bytes` under a fresh name. Caller holds the write lock.
    fn write_new(&self, bytes: &[u8]) -> Result<String> {
        let timestamp = format_timestamp(Utc::now());
        let mut start = 1;
        loop {
            let (name, sequence) = next_free_name(&*self.fs, &self.data_dir, &timestamp, start)?;
            let path = self.data_dir.join(&name);
            let mut writer = match self.fs.create_new(&path) {
                Ok(writer) => writer,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    start = sequence + 1;
                    continue;
                }
                Err(err) => return Err(err).context(IoSnafu { path }),
            };

            let written = writer.write_all(bytes).and_then(|()| {
                if self.config.sync_writes {
                    writer.sync_all()
                } else {
                    writer.flush()
                }
            });
            drop(writer);

            if let Err(err) = written {
                // A half-written file would later be quarantined as corrupt.
                let _ = self.fs.delete(&path);
                return Err(err).context(IoSnafu { path });
            }
            metrics::ENQUEUED.inc();
            debug!(file = %name, bytes = bytes.len(), "Saved data file");
            return Ok(name);
        }
    }

    async fn write_new_async(&self, bytes: Vec<u8>) -> Result<String> {
        let timestamp = format_timestamp(Utc::now());
        let mut start = 1;
        loop {
            let (name, sequence) =
                next_free_name_async(&*self.fs, &self.data_dir, &timestamp, start).await?;
            let path = self.data_dir.join(&name);
            let len = bytes.len();
            match self
                .fs
                .create_new_async(&path, bytes.clone(), self.config.sync_writes)
                .await
            {
                Ok(()) => {
                    metrics::ENQUEUED.inc();
                    debug!(file = %name, bytes = len, "Saved data file");
                    return Ok(name);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    start = sequence + 1;
                }
                Err(err) => {
                    let _ = self.fs.delete_async(&path).await;
                    return Err(err).context(IoSnafu { path });
                }
            }
        }
    }

    /// Persists `item` behind every item saved before it. Returns the data
    /// file name.
    pub fn save(&self, item: &T) -> Result<String> {
        let bytes = self.encode(item)?;
        let _guard = self.lock.write()?;
        self.write_new(&bytes)
    }

    /// Persists `items` in order under a single write lock.
    pub fn save_all(&self, items: &[T]) -> Result<Vec<String>> {
        let encoded = items
            .iter()
            .map(|item| self.encode(item))
            .collect::<Result<Vec<_>>>()?;
        let _guard = self.lock.write()?;
        encoded.iter().map(|bytes| self.write_new(bytes)).collect()
    }

    pub async fn save_async(&self, item: &T, cancel: &CancellationToken) -> Result<String> {
        tokio::task::yield_now().await;
        ensure!(!cancel.is_cancelled(), CancelledSnafu);
        let bytes = self.encode(item)?;
        let _guard = self.lock.write_async().await?;
        ensure!(!cancel.is_cancelled(), CancelledSnafu);
        self.write_new_async(bytes).await
    }

    // ------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------

    /// Oldest readable item. With `remove` the item's file is committed
    /// under the write lock; otherwise only a read lock is taken.
    ///
    /// Returns `Ok(None)` when no readable item is queued.
    pub fn load_oldest(&self, remove: bool) -> Result<Option<T>> {
        if remove {
            let _guard = self.lock.write()?;
            let Some((name, item)) = self.first_valid(self.list()?) else {
                return Ok(None);
            };
            self.commit(std::slice::from_ref(&name));
            Ok(Some(item))
        } else {
            let _guard = self.lock.read()?;
            Ok(self.first_valid(self.list()?).map(|(_, item)| item))
        }
    }

    pub async fn load_oldest_async(
        &self,
        remove: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        tokio::task::yield_now().await;
        ensure!(!cancel.is_cancelled(), CancelledSnafu);
        if remove {
            let _guard = self.lock.write_async().await?;
            let names = self.list_async().await?;
            let Some((name, item)) = self.first_valid_async(names, cancel).await? else {
                return Ok(None);
            };
            self.commit_async(std::slice::from_ref(&name)).await;
            Ok(Some(item))
        } else {
            let _guard = self.lock.read_async().await?;
            let names = self.list_async().await?;
            Ok(self
                .first_valid_async(names, cancel)
                .await?
                .map(|(_, item)| item))
        }
    }

    /// Every readable item in queue order. Nothing is removed.
    pub fn load_all(&self) -> Result<Vec<T>> {
        let _guard = self.lock.read()?;
        Ok(self
            .list()?
            .into_iter()
            .filter_map(|name| {
                let outcome = self.load(&name);
                self.triage(&name, outcome)
            })
            .collect())
    }

    pub async fn load_all_async(&self, cancel: &CancellationToken) -> Result<Vec<T>> {
        tokio::task::yield_now().await;
        let _guard = self.lock.read_async().await?;
        let mut items = Vec::new();
        for name in self.list_async().await? {
            ensure!(!cancel.is_cancelled(), CancelledSnafu);
            let outcome = self.load_async(&name).await;
            items.extend(self.triage_async(&name, outcome).await);
        }
        Ok(items)
    }

    /// Number of data files currently in the queue.
    pub fn len(&self) -> Result<usize> {
        let _guard = self.lock.read()?;
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> { Ok(self.len()? == 0) }

    pub async fn len_async(&self) -> Result<usize> {
        tokio::task::yield_now().await;
        let _guard = self.lock.read_async().await?;
        Ok(self.list_async().await?.len())
    }

    // ------------------------------------------------------------------
    // Process-then-commit
    // ------------------------------------------------------------------

    /// Hands the oldest readable item to `action` and commits it only if the
    /// action succeeds.
    ///
    /// Returns `Ok(false)` if the queue is empty or the action failed; the
    /// action's error is logged, not returned. If the upgrade to exclusive
    /// access times out after a successful action, the item stays queued and
    /// `LockTimeout` is returned.
    pub fn process_oldest<F, E>(&self, action: F) -> Result<bool>
    where
        F: FnOnce(T) -> std::result::Result<(), E>,
        E: Display,
    {
        let guard = self.lock.upgradable_read()?;
        let Some((name, item)) = self.first_valid(self.list()?) else {
            return Ok(false);
        };

        if let Err(err) = action(item) {
            Self::action_failed(&err, 1);
            return Ok(false);
        }

        let _write = guard.upgrade()?;
        self.commit(std::slice::from_ref(&name));
        Ok(true)
    }

    pub async fn process_oldest_async<F, Fut, E>(
        &self,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<bool>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Display,
    {
        tokio::task::yield_now().await;
        ensure!(!cancel.is_cancelled(), CancelledSnafu);
        let guard = self.lock.upgradable_read_async().await?;
        let names = self.list_async().await?;
        let Some((name, item)) = self.first_valid_async(names, cancel).await? else {
            return Ok(false);
        };
        ensure!(!cancel.is_cancelled(), CancelledSnafu);

        if let Err(err) = action(item).await {
            Self::action_failed(&err, 1);
            return Ok(false);
        }

        let _write = guard.upgrade_async().await?;
        self.commit_async(std::slice::from_ref(&name)).await;
        Ok(true)
    }

    /// Collects the leading run of items for which `predicate` holds, hands
    /// them to `action`, and commits all of them only if it succeeds.
    ///
    /// The scan and the action both run under the lock, so the predicate
    /// should bound how many items it accepts.
    ///
    /// Returns the number of committed items: zero if no item matched or the
    /// action failed.
    pub fn process_while<St, P, F, E>(
        &self,
        state: &mut St,
        mut predicate: P,
        action: F,
    ) -> Result<usize>
    where
        P: FnMut(&T, &mut St) -> bool,
        F: FnOnce(Vec<T>) -> std::result::Result<(), E>,
        E: Display,
    {
        let guard = self.lock.upgradable_read()?;
        let mut names = Vec::new();
        let mut items = Vec::new();

        for name in self.list()? {
            let outcome = self.load(&name);
            let Some(item) = self.triage(&name, outcome) else {
                continue;
            };
            if !predicate(&item, state) {
                break;
            }
            names.push(name);
            items.push(item);
        }

        if items.is_empty() {
            return Ok(0);
        }
        if let Err(err) = action(items) {
            Self::action_failed(&err, names.len());
            return Ok(0);
        }

        let _write = guard.upgrade()?;
        Ok(self.commit(&names))
    }

    pub async fn process_while_async<St, P, F, Fut, E>(
        &self,
        state: &mut St,
        mut predicate: P,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<usize>
    where
        P: FnMut(&T, &mut St) -> bool,
        F: FnOnce(Vec<T>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Display,
    {
        tokio::task::yield_now().await;
        ensure!(!cancel.is_cancelled(), CancelledSnafu);
        let guard = self.lock.upgradable_read_async().await?;
        let mut names = Vec::new();
        let mut items = Vec::new();

        for name in self.list_async().await? {
            ensure!(!cancel.is_cancelled(), CancelledSnafu);
            let outcome = self.load_async(&name).await;
            let Some(item) = self.triage_async(&name, outcome).await else {
                continue;
            };
            if !predicate(&item, state) {
                break;
            }
            names.push(name);
            items.push(item);
        }

        if items.is_empty() {
            return Ok(0);
        }
        ensure!(!cancel.is_cancelled(), CancelledSnafu);
        if let Err(err) = action(items).await {
            Self::action_failed(&err, names.len());
            return Ok(0);
        }

        // The action has consumed the batch; the delete pass is not
        // interruptible from here on.
        let _write = guard.upgrade_async().await?;
        Ok(self.commit_async(&names).await)
    }

    // ------------------------------------------------------------------
    // Clear and exclusion maintenance
    // ------------------------------------------------------------------

    /// Removes every data file, excluded ones included, then heals the
    /// exclusion set. Returns how many files left the data directory.
    pub fn remove_all(&self) -> Result<usize> {
        let _guard = self.lock.write()?;
        let removed = self
            .list_raw()?
            .iter()
            .map(|name| self.quarantine.discard(name))
            .filter(|outcome| left_data_dir(*outcome))
            .count();
        self.quarantine.heal();
        info!(removed, "Queue cleared");
        Ok(removed)
    }

    pub async fn remove_all_async(&self, cancel: &CancellationToken) -> Result<usize> {
        tokio::task::yield_now().await;
        let _guard = self.lock.write_async().await?;
        let mut removed = 0;
        for name in self.list_raw_async().await? {
            ensure!(!cancel.is_cancelled(), CancelledSnafu);
            if left_data_dir(self.quarantine.discard_async(&name).await) {
                removed += 1;
            }
        }
        self.quarantine.heal_async().await;
        info!(removed, "Queue cleared");
        Ok(removed)
    }

    /// Re-validates the exclusion set now. Returns how many names were
    /// dropped because their files are gone.
    pub fn heal_exclusions(&self) -> usize { self.quarantine.heal() }

    pub async fn heal_exclusions_async(&self) -> usize { self.quarantine.heal_async().await }

    /// Data file names currently skipped because they could be neither
    /// quarantined nor deleted.
    pub fn excluded_files(&self) -> Vec<String> { self.quarantine.exclusions().snapshot() }

    /// Names of the files in the poison directory, sorted.
    pub fn poison_files(&self) -> Result<Vec<String>> {
        let mut names = self
            .fs
            .list_files(&self.poison_dir, DATA_EXTENSION)
            .context(IoSnafu {
                path: self.poison_dir.clone(),
            })?;
        names.sort_unstable();
        Ok(names)
    }
}

const fn left_data_dir(outcome: QuarantineOutcome) -> bool {
    matches!(
        outcome,
        QuarantineOutcome::Deleted | QuarantineOutcome::Quarantined
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{fs::LocalFileSystem, serializer::JsonSerializer};

    fn open(root: &Path) -> QueueStore<String, JsonSerializer> {
        let config = QueueConfig {
            root: root.to_path_buf(),
            lock_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        QueueStore::open(config, Arc::new(LocalFileSystem), JsonSerializer).unwrap()
    }

    fn data_files(store: &QueueStore<String, JsonSerializer>) -> Vec<String> {
        let mut names = store.list_raw().unwrap();
        names.sort();
        names
    }

    #[test]
    fn test_open_creates_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        assert!(temp_dir.path().join("Data").is_dir());
        assert!(temp_dir.path().join("Poison").is_dir());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_save_names_are_ordered_and_parseable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        let saved: Vec<String> = (0..20)
            .map(|i| store.save(&format!("item-{i}")).unwrap())
            .collect();

        let mut sorted = saved.clone();
        sorted.sort();
        assert_eq!(saved, sorted);
        assert!(saved.iter().all(|name| crate::path::is_data_file_name(name)));
        assert_eq!(data_files(&store), saved);
    }

    #[test]
    fn test_load_oldest_peek_then_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        store.save(&"a".to_string()).unwrap();
        store.save(&"b".to_string()).unwrap();

        assert_eq!(store.load_oldest(false).unwrap().as_deref(), Some("a"));
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.load_oldest(true).unwrap().as_deref(), Some("a"));
        assert_eq!(store.load_oldest(true).unwrap().as_deref(), Some("b"));
        assert_eq!(store.load_oldest(true).unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_quarantined_during_scan() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        let bad = store.save(&"bad".to_string()).unwrap();
        store.save(&"good".to_string()).unwrap();
        std::fs::write(store.data_dir().join(&bad), b"{not json").unwrap();

        assert_eq!(store.load_oldest(false).unwrap().as_deref(), Some("good"));
        assert_eq!(store.poison_files().unwrap(), vec![bad]);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_process_oldest_failure_keeps_item() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        store.save(&"job".to_string()).unwrap();

        let committed = store
            .process_oldest(|item| {
                assert_eq!(item, "job");
                Err("handler failed")
            })
            .unwrap();
        assert!(!committed);
        assert_eq!(store.len().unwrap(), 1);

        assert!(store.process_oldest(|_| Ok::<_, String>(())).unwrap());
        assert_eq!(store.len().unwrap(), 0);
        assert!(!store.process_oldest(|_| Ok::<_, String>(())).unwrap());
    }

    #[test]
    fn test_process_while_counts_state() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        let items: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        store.save_all(&items).unwrap();

        let mut budget = 3usize;
        let committed = store
            .process_while(
                &mut budget,
                |_, budget| {
                    if *budget == 0 {
                        return false;
                    }
                    *budget -= 1;
                    true
                },
                |batch| {
                    assert_eq!(batch, vec!["0", "1", "2"]);
                    Ok::<_, String>(())
                },
            )
            .unwrap();
        assert_eq!(committed, 3);
        assert_eq!(budget, 0);
        assert_eq!(store.load_all().unwrap(), vec!["3", "4"]);
    }

    #[test]
    fn test_peek_allowed_while_action_runs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        store.save(&"x".to_string()).unwrap();

        let committed = store
            .process_oldest(|_| {
                // Readers are admitted under the upgradeable grant.
                assert_eq!(store.load_oldest(false).unwrap().as_deref(), Some("x"));
                // Writers are not.
                assert!(store.save(&"y".to_string()).unwrap_err().is_lock_timeout());
                Ok::<_, String>(())
            })
            .unwrap();
        assert!(committed);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_remove_all() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        assert_eq!(store.remove_all().unwrap(), 0);
        store
            .save_all(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(store.remove_all().unwrap(), 2);
        assert_eq!(store.len().unwrap(), 0);
        assert!(store.poison_files().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_async_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        let cancel = CancellationToken::new();

        store.save_async(&"a".to_string(), &cancel).await.unwrap();
        store.save_async(&"b".to_string(), &cancel).await.unwrap();
        assert_eq!(store.len_async().await.unwrap(), 2);
        assert_eq!(
            store.load_oldest_async(true, &cancel).await.unwrap().as_deref(),
            Some("a")
        );
        assert_eq!(store.load_all_async(&cancel).await.unwrap(), vec!["b"]);
        assert_eq!(store.remove_all_async(&cancel).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_async_cancelled_before_action() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(temp_dir.path());
        let cancel = CancellationToken::new();
        store.save_async(&"a".to_string(), &cancel).await.unwrap();

        cancel.cancel();
        let err = store
            .process_oldest_async(|_| async { Ok::<_, String>(()) }, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(store.len().unwrap(), 1);
    }
}
