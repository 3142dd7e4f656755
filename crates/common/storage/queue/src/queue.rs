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

//! The persisted queue.
//!
//! [`PersistedQueue`] is the public FIFO built on [`QueueStore`]. Each item
//! lives in its own file under `<root>/Data`, so a queue survives process
//! restarts and can be shared by every thread and task in the process.
//!
//! ## Usage
//!
//! ```ignore
//! let queue: PersistedQueue<Job> = QueueBuilder::new("/var/spool/jobs").build()?;
//!
//! queue.enqueue(&job)?;
//!
//! // Commit only once the job ran.
//! queue.dequeue_with_action(|job| run(job))?;
//!
//! // Hand up to 100 jobs to one batch call.
//! let mut seen = 0;
//! queue.dequeue_while_with_action(
//!     &mut seen,
//!     |_, seen| { *seen += 1; *seen <= 100 },
//!     |jobs| run_batch(jobs),
//! )?;
//! ```
//!
//! Items that can no longer be read are moved to `<root>/Poison` and never
//! delivered again.

use std::{fmt::Display, future::Future, path::Path, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use snafu::OptionExt;
use tokio_util::sync::CancellationToken;

use crate::{
    QueueBuilder, QueueConfig, Result,
    error::EmptyQueueSnafu,
    serializer::{JsonSerializer, Serializer},
    store::QueueStore,
};

/// A crash-resilient FIFO queue of `T`, one file per item.
///
/// Cloning is cheap; clones share the same lock and exclusion set. Open a
/// root directory through a single queue value (and its clones) per process.
pub struct PersistedQueue<T, S = JsonSerializer> {
    store: Arc<QueueStore<T, S>>,
}

impl<T, S> Clone for PersistedQueue<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<T, S> std::fmt::Debug for PersistedQueue<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedQueue")
            .field("store", &self.store)
            .finish()
    }
}

impl<T> PersistedQueue<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Opens a JSON-encoded queue at `root` with default settings.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        QueueBuilder::new(root.as_ref()).build()
    }
}

impl<T, S> PersistedQueue<T, S>
where
    S: Serializer<T>,
{
    pub(crate) fn from_store(store: QueueStore<T, S>) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// The underlying storage primitives.
    pub fn store(&self) -> &QueueStore<T, S> { &self.store }

    pub fn config(&self) -> &QueueConfig { self.store.config() }

    pub fn data_dir(&self) -> &Path { self.store.data_dir() }

    pub fn poison_dir(&self) -> &Path { self.store.poison_dir() }

    /// Appends `item` to the tail of the queue.
    pub fn enqueue(&self, item: &T) -> Result<()> { self.store.save(item).map(drop) }

    /// Appends `items` in order, holding the write lock for the whole batch.
    pub fn enqueue_many(&self, items: &[T]) -> Result<()> { self.store.save_all(items).map(drop) }

    /// Removes and returns the head item.
    ///
    /// Fails with `EmptyQueue` if there is nothing readable to return.
    pub fn dequeue(&self) -> Result<T> { self.try_dequeue()?.context(EmptyQueueSnafu) }

    /// Like [`dequeue`](Self::dequeue) but reports an empty queue as `None`.
    pub fn try_dequeue(&self) -> Result<Option<T>> { self.store.load_oldest(true) }

    /// Returns the head item without removing it.
    pub fn peek(&self) -> Result<T> { self.try_peek()?.context(EmptyQueueSnafu) }

    pub fn try_peek(&self) -> Result<Option<T>> { self.store.load_oldest(false) }

    /// Dequeues the head item only if `action` succeeds on it.
    ///
    /// Returns `Ok(true)` when the item was handled and removed, `Ok(false)`
    /// when the queue was empty or the action returned an error. While the
    /// action runs, readers proceed and writers wait.
    pub fn dequeue_with_action<F, E>(&self, action: F) -> Result<bool>
    where
        F: FnOnce(T) -> std::result::Result<(), E>,
        E: Display,
    {
        self.store.process_oldest(action)
    }

    /// Dequeues the leading run of items accepted by `predicate`, as one
    /// batch, only if `action` succeeds on that batch.
    ///
    /// `predicate` sees each item in order along with `state` and stops the
    /// run at the first item it rejects; that item and everything after it
    /// stay queued. Returns the number of items removed.
    pub fn dequeue_while_with_action<St, P, F, E>(
        &self,
        state: &mut St,
        predicate: P,
        action: F,
    ) -> Result<usize>
    where
        P: FnMut(&T, &mut St) -> bool,
        F: FnOnce(Vec<T>) -> std::result::Result<(), E>,
        E: Display,
    {
        self.store.process_while(state, predicate, action)
    }

    /// Removes every item. Files that cannot be deleted are quarantined.
    /// Returns how many files were removed.
    pub fn clear(&self) -> Result<usize> { self.store.remove_all() }

    pub fn count(&self) -> Result<usize> { self.store.len() }

    pub fn is_empty(&self) -> Result<bool> { self.store.is_empty() }

    /// Every readable item, head first, without removing anything.
    pub fn snapshot(&self) -> Result<Vec<T>> { self.store.load_all() }

    /// Drops exclusion-set entries whose files no longer exist.
    pub fn heal_exclusions(&self) -> usize { self.store.heal_exclusions() }

    pub fn excluded_files(&self) -> Vec<String> { self.store.excluded_files() }

    pub fn poison_files(&self) -> Result<Vec<String>> { self.store.poison_files() }

    pub async fn enqueue_async(&self, item: &T, cancel: &CancellationToken) -> Result<()> {
        self.store.save_async(item, cancel).await.map(drop)
    }

    pub async fn dequeue_async(&self, cancel: &CancellationToken) -> Result<T> {
        self.try_dequeue_async(cancel)
            .await?
            .context(EmptyQueueSnafu)
    }

    pub async fn try_dequeue_async(&self, cancel: &CancellationToken) -> Result<Option<T>> {
        self.store.load_oldest_async(true, cancel).await
    }

    pub async fn peek_async(&self, cancel: &CancellationToken) -> Result<T> {
        self.try_peek_async(cancel).await?.context(EmptyQueueSnafu)
    }

    pub async fn try_peek_async(&self, cancel: &CancellationToken) -> Result<Option<T>> {
        self.store.load_oldest_async(false, cancel).await
    }

    /// Async [`dequeue_with_action`](Self::dequeue_with_action).
    ///
    /// Cancellation is honoured until the action is invoked. Once the action
    /// has succeeded the item is always committed.
    pub async fn dequeue_with_action_async<F, Fut, E>(
        &self,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<bool>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Display,
    {
        self.store.process_oldest_async(action, cancel).await
    }

    /// Async [`dequeue_while_with_action`](Self::dequeue_while_with_action).
    pub async fn dequeue_while_with_action_async<St, P, F, Fut, E>(
        &self,
        state: &mut St,
        predicate: P,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<usize>
    where
        P: FnMut(&T, &mut St) -> bool,
        F: FnOnce(Vec<T>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Display,
    {
        self.store
            .process_while_async(state, predicate, action, cancel)
            .await
    }

    pub async fn clear_async(&self, cancel: &CancellationToken) -> Result<usize> {
        self.store.remove_all_async(cancel).await
    }

    pub async fn count_async(&self) -> Result<usize> { self.store.len_async().await }

    pub async fn snapshot_async(&self, cancel: &CancellationToken) -> Result<Vec<T>> {
        self.store.load_all_async(cancel).await
    }

    pub async fn heal_exclusions_async(&self) -> usize { self.store.heal_exclusions_async().await }
}
