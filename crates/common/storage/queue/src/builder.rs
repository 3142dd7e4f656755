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

use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    PersistedQueue, QueueConfig, Result,
    fs::{FileSystem, LocalFileSystem},
    serializer::{JsonSerializer, Serializer},
    store::QueueStore,
};

/// Configures and opens a [`PersistedQueue`].
pub struct QueueBuilder<S = JsonSerializer> {
    config:     QueueConfig,
    fs:         Arc<dyn FileSystem>,
    serializer: S,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self::from_config(QueueConfig {
            root: root.into(),
            ..Default::default()
        })
    }

    pub fn from_config(config: QueueConfig) -> Self {
        Self {
            config,
            fs: Arc::new(LocalFileSystem),
            serializer: JsonSerializer,
        }
    }
}

impl<S> QueueBuilder<S> {
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    pub const fn sync_writes(mut self, sync: bool) -> Self {
        self.config.sync_writes = sync;
        self
    }

    pub const fn heal_interval(mut self, interval: Duration) -> Self {
        self.config.heal_interval = interval;
        self
    }

    /// Replaces the file system the queue talks to.
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Replaces the item encoding.
    pub fn serializer<S2>(self, serializer: S2) -> QueueBuilder<S2> {
        QueueBuilder {
            config: self.config,
            fs: self.fs,
            serializer,
        }
    }

    pub const fn config(&self) -> &QueueConfig { &self.config }

    pub fn build<T>(self) -> Result<PersistedQueue<T, S>>
    where
        S: Serializer<T>,
    {
        let store = QueueStore::open(self.config, self.fs, self.serializer)?;
        Ok(PersistedQueue::from_store(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{BincodeSerializer, Checksummed};

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("/tmp/test_queue");
        assert_eq!(builder.config().root, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.config().lock_timeout, crate::default_lock_timeout());
        assert!(!builder.config().sync_writes);
        assert_eq!(builder.config().heal_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("/tmp/test_queue")
            .lock_timeout(Duration::from_millis(250))
            .sync_writes(true)
            .heal_interval(Duration::from_secs(5));
        assert_eq!(builder.config().lock_timeout, Duration::from_millis(250));
        assert!(builder.config().sync_writes);
        assert_eq!(builder.config().heal_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_with_serializer() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = QueueBuilder::new(temp_dir.path())
            .serializer(Checksummed::new(BincodeSerializer))
            .build::<Vec<u64>>()
            .unwrap();
        queue.enqueue(&vec![1, 2, 3]).unwrap();
        assert_eq!(queue.dequeue().unwrap(), vec![1, 2, 3]);
    }
}
