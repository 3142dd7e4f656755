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

//! A crash-resilient FIFO queue persisted as one file per item.
//!
//! Items are serialized into `<root>/Data`, named so that lexical order is
//! enqueue order. Files that can no longer be read are moved to
//! `<root>/Poison`; files that can be neither moved nor deleted are skipped
//! until they disappear. Consumers can dequeue under a transaction that only
//! removes items once the caller's action has succeeded.
//!
//! ```ignore
//! use spool_queue::QueueBuilder;
//!
//! let queue = QueueBuilder::new("/var/spool/mail").build::<Envelope>()?;
//! queue.enqueue(&envelope)?;
//! queue.dequeue_with_action(|envelope| deliver(envelope))?;
//! ```

pub mod builder;
pub mod config;
mod crc;
pub mod error;
pub mod fs;
pub mod lock;
pub mod metrics;
pub mod path;
mod quarantine;
pub mod queue;
pub mod serializer;
pub mod store;

pub use builder::QueueBuilder;
pub use config::{DEFAULT_LOCK_TIMEOUT, QueueConfig, default_lock_timeout, set_default_lock_timeout};
pub use error::{QueueError, Result};
pub use fs::{FileAccessOutcome, FileSystem, FileWriter, LocalFileSystem};
pub use lock::LockMode;
pub use quarantine::QuarantineOutcome;
pub use queue::PersistedQueue;
pub use serializer::{BincodeSerializer, Checksummed, JsonSerializer, Serializer, SerializerError};
pub use store::QueueStore;
pub use tokio_util::sync::CancellationToken;
