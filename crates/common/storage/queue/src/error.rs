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

use std::{path::PathBuf, time::Duration};

use snafu::Snafu;

use crate::{lock::LockMode, serializer::SerializerError};

/// Queue operation errors.
///
/// Only failures the caller can act on surface here. Unreadable, corrupt or
/// inaccessible data files found while scanning are routed into quarantine
/// and never reported as errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    /// Filesystem I/O failure on a path the caller depends on.
    #[snafu(display("IO error on {}", path.display()))]
    Io {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The item could not be converted into bytes.
    #[snafu(display("Failed to serialize item"))]
    Serialize {
        source: SerializerError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The queue lock could not be acquired within the configured timeout.
    #[snafu(display("Timed out after {timeout:?} waiting for {mode} lock"))]
    LockTimeout {
        mode:    LockMode,
        timeout: Duration,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    /// Dequeue was requested but no valid item is queued.
    #[snafu(display("Queue is empty"))]
    EmptyQueue {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// Every disambiguating sequence number for one timestamp tick is taken.
    #[snafu(display("No free data file name left for timestamp {timestamp}"))]
    NameSpaceExhausted {
        timestamp: String,
        #[snafu(implicit)]
        loc:       snafu::Location,
    },

    /// The operation observed a cancellation request.
    #[snafu(display("Operation cancelled"))]
    Cancelled {
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

impl QueueError {
    /// Returns `true` if the error is [`QueueError::EmptyQueue`].
    pub const fn is_empty_queue(&self) -> bool { matches!(self, Self::EmptyQueue { .. }) }

    /// Returns `true` if the error is [`QueueError::LockTimeout`].
    pub const fn is_lock_timeout(&self) -> bool { matches!(self, Self::LockTimeout { .. }) }

    /// Returns `true` if the error is [`QueueError::Cancelled`].
    pub const fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled { .. }) }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
