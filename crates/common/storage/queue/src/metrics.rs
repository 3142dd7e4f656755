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

use std::sync::LazyLock;

use prometheus::{IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec};

pub const LOCK_MODE_LABEL: &str = "mode";
pub const QUARANTINE_OUTCOME_LABEL: &str = "outcome";

pub static ENQUEUED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_queue_enqueued_total",
        "Total number of items persisted to a queue"
    )
    .unwrap()
});

pub static DEQUEUED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_queue_dequeued_total",
        "Total number of items committed (removed) from a queue"
    )
    .unwrap()
});

pub static QUARANTINED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "spool_queue_quarantined_total",
        "Total number of data files routed through quarantine, by outcome",
        &[QUARANTINE_OUTCOME_LABEL]
    )
    .unwrap()
});

pub static ACTION_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_queue_action_failures_total",
        "Total number of transactional dequeues aborted by the caller's action"
    )
    .unwrap()
});

pub static LOCK_TIMEOUTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "spool_queue_lock_timeouts_total",
        "Total number of lock acquisitions that timed out",
        &[LOCK_MODE_LABEL]
    )
    .unwrap()
});
