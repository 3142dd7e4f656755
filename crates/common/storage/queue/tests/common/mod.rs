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

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    io::{self, Read},
    path::Path,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use spool_queue::{FileSystem, FileWriter, LocalFileSystem};

/// Fault kinds that can be switched on per file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Reads fail with `PermissionDenied`.
    DenyRead,
    /// Moves out of the directory fail.
    DenyRename,
    /// Deletes fail.
    DenyDelete,
    /// Existence checks fail with `PermissionDenied`.
    DenyStat,
}

/// [`LocalFileSystem`] with injectable per-file failures and slow reads.
#[derive(Debug, Default)]
pub struct FaultyFileSystem {
    inner:      LocalFileSystem,
    faults:     Mutex<HashSet<(String, Fault)>>,
    read_delay: Mutex<Option<Duration>>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn injected(kind: io::ErrorKind) -> io::Error { io::Error::new(kind, "injected fault") }

impl FaultyFileSystem {
    pub fn inject(&self, name: &str, fault: Fault) { self.faults.lock().insert((name.to_owned(), fault)); }

    pub fn heal(&self, name: &str) { self.faults.lock().retain(|(n, _)| n != name); }

    pub fn set_read_delay(&self, delay: Option<Duration>) { *self.read_delay.lock() = delay; }

    fn check(&self, path: &Path, fault: Fault) -> io::Result<()> {
        if self.faults.lock().contains(&(file_name(path), fault)) {
            let kind = match fault {
                Fault::DenyRead | Fault::DenyStat => io::ErrorKind::PermissionDenied,
                Fault::DenyRename | Fault::DenyDelete => io::ErrorKind::Other,
            };
            return Err(injected(kind));
        }
        Ok(())
    }

    fn delay(&self) {
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }
}

#[async_trait]
impl FileSystem for FaultyFileSystem {
    fn try_exists(&self, path: &Path) -> io::Result<bool> {
        self.check(path, Fault::DenyStat)?;
        self.inner.try_exists(path)
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.check(path, Fault::DenyRead)?;
        self.delay();
        self.inner.open_read(path)
    }

    fn create_new(&self, path: &Path) -> io::Result<Box<dyn FileWriter>> { self.inner.create_new(path) }

    fn delete(&self, path: &Path) -> io::Result<()> {
        self.check(path, Fault::DenyDelete)?;
        self.inner.delete(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(from, Fault::DenyRename)?;
        self.inner.rename(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> { self.inner.create_dir_all(path) }

    fn list_files(&self, dir: &Path, extension: &str) -> io::Result<Vec<String>> {
        self.inner.list_files(dir, extension)
    }

    async fn try_exists_async(&self, path: &Path) -> io::Result<bool> {
        self.check(path, Fault::DenyStat)?;
        self.inner.try_exists_async(path).await
    }

    async fn read_async(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.check(path, Fault::DenyRead)?;
        self.inner.read_async(path).await
    }

    async fn create_new_async(&self, path: &Path, contents: Vec<u8>, sync: bool) -> io::Result<()> {
        self.inner.create_new_async(path, contents, sync).await
    }

    async fn delete_async(&self, path: &Path) -> io::Result<()> {
        self.check(path, Fault::DenyDelete)?;
        self.inner.delete_async(path).await
    }

    async fn rename_async(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(from, Fault::DenyRename)?;
        self.inner.rename_async(from, to).await
    }

    async fn list_files_async(&self, dir: &Path, extension: &str) -> io::Result<Vec<String>> {
        self.inner.list_files_async(dir, extension).await
    }
}

/// Names of the data files on disk, sorted, ignoring the exclusion set.
pub fn data_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
