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

use std::{
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Lock timeout used when a queue is built without an explicit one.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

static PROCESS_LOCK_TIMEOUT_NANOS: AtomicU64 = AtomicU64::new(1_000_000_000);

/// Sets the process-wide default lock timeout.
///
/// Only queues constructed afterwards pick it up.
pub fn set_default_lock_timeout(timeout: Duration) {
    let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
    PROCESS_LOCK_TIMEOUT_NANOS.store(nanos, Ordering::Relaxed);
}

/// The process-wide default lock timeout.
pub fn default_lock_timeout() -> Duration {
    Duration::from_nanos(PROCESS_LOCK_TIMEOUT_NANOS.load(Ordering::Relaxed))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding the `Data` and `Poison` subdirectories.
    #[default(_code = "PathBuf::from(\"./queue\")")]
    pub root:          PathBuf,
    /// How long any lock acquisition or upgrade may wait before failing.
    #[default(_code = "default_lock_timeout()")]
    pub lock_timeout:  Duration,
    /// fsync every data file after writing it.
    pub sync_writes:   bool,
    /// Minimum time between automatic re-validations of the exclusion set.
    #[default(_code = "Duration::from_secs(30)")]
    pub heal_interval: Duration,
}
