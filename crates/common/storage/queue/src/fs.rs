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

//! File-system port.
//!
//! The queue core only touches the disk through [`FileSystem`], which keeps
//! the quarantine paths testable with injected failures. [`LocalFileSystem`]
//! is the production implementation over `std::fs` and `tokio::fs`.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::serializer::SerializerError;

/// Outcome of trying to load one data file.
///
/// Scans match on this instead of intercepting errors: everything except
/// [`Ok`](Self::Ok) and [`Missing`](Self::Missing) routes the file into
/// quarantine.
#[derive(Debug)]
pub enum FileAccessOutcome<T> {
    Ok(T),
    /// File locked, disk error, or any other I/O failure.
    TransientIoError(io::Error),
    PermissionDenied(io::Error),
    /// The bytes were read but did not deserialize.
    CorruptData(SerializerError),
    /// The file disappeared between listing and opening.
    Missing,
}

impl<T> FileAccessOutcome<T> {
    pub fn from_io_error(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::Missing,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err),
            _ => Self::TransientIoError(err),
        }
    }

    /// Short label used in logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ok(_) => "ok",
            Self::TransientIoError(_) => "io_error",
            Self::PermissionDenied(_) => "permission_denied",
            Self::CorruptData(_) => "corrupt_data",
            Self::Missing => "missing",
        }
    }
}

impl<T> fmt::Display for FileAccessOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(_) => f.write_str("ok"),
            Self::TransientIoError(err) => write!(f, "io error: {err}"),
            Self::PermissionDenied(err) => write!(f, "permission denied: {err}"),
            Self::CorruptData(err) => write!(f, "corrupt data: {err}"),
            Self::Missing => f.write_str("missing"),
        }
    }
}

/// A freshly created file being written.
pub trait FileWriter: Write + Send {
    /// Flush buffers and force contents to stable storage.
    fn sync_all(&mut self) -> io::Result<()>;
}

impl FileWriter for BufWriter<File> {
    fn sync_all(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_ref().sync_all()
    }
}

/// Disk operations used by the queue, sync and async.
#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// `Ok(false)` only when `path` is known to be absent. Stat failures are
    /// errors, not absence.
    fn try_exists(&self, path: &Path) -> io::Result<bool>;

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Create a new file. Fails with `AlreadyExists` if `path` is taken.
    fn create_new(&self, path: &Path) -> io::Result<Box<dyn FileWriter>>;

    fn delete(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Names (not paths) of regular files in `dir` ending in `.{extension}`.
    /// Unordered.
    fn list_files(&self, dir: &Path, extension: &str) -> io::Result<Vec<String>>;

    async fn try_exists_async(&self, path: &Path) -> io::Result<bool>;

    async fn read_async(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create `path` (failing if it exists) with `contents`.
    async fn create_new_async(&self, path: &Path, contents: Vec<u8>, sync: bool) -> io::Result<()>;

    async fn delete_async(&self, path: &Path) -> io::Result<()>;

    async fn rename_async(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn list_files_async(&self, dir: &Path, extension: &str) -> io::Result<Vec<String>>;
}

fn matches_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some(extension)
}

/// The local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn try_exists(&self, path: &Path) -> io::Result<bool> { path.try_exists() }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }

    fn create_new(&self, path: &Path) -> io::Result<Box<dyn FileWriter>> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn delete(&self, path: &Path) -> io::Result<()> { std::fs::remove_file(path) }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> { std::fs::rename(from, to) }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> { std::fs::create_dir_all(path) }

    fn list_files(&self, dir: &Path, extension: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || !matches_extension(&path, extension) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                names.push(name.to_owned());
            }
        }
        Ok(names)
    }

    async fn try_exists_async(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn read_async(&self, path: &Path) -> io::Result<Vec<u8>> { tokio::fs::read(path).await }

    async fn create_new_async(&self, path: &Path, contents: Vec<u8>, sync: bool) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(&contents).await?;
        file.flush().await?;
        if sync {
            file.sync_all().await?;
        }
        Ok(())
    }

    async fn delete_async(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn rename_async(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn list_files_async(&self, dir: &Path, extension: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || !matches_extension(&path, extension) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                names.push(name.to_owned());
            }
        }
        Ok(names)
    }
}
