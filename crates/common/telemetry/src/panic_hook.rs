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

//! # Panic Hook and Deadlock Detection
//!
//! Routes panics through `tracing` with a backtrace and counts them. With the
//! `deadlock_detection` feature, also watches `parking_lot` locks for
//! deadlocks.

#[cfg(feature = "deadlock_detection")]
use std::time::Duration;
use std::{panic, sync::LazyLock};

use backtrace::Backtrace;
use prometheus::{IntCounter, register_int_counter};

/// Prometheus counter for tracking application panics.
pub static PANIC_COUNTER: LazyLock<IntCounter> =
    LazyLock::new(|| register_int_counter!("spool_panic_total", "Panics observed").unwrap());

/// Replace the panic handler with one that logs the panic and its location
/// as a structured error event, then defers to the previous handler.
pub fn set_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic| {
        let backtrace = format!("{:?}", Backtrace::new());
        match panic.location() {
            Some(location) => tracing::error!(
                message = %panic,
                backtrace = %backtrace,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
            ),
            None => tracing::error!(message = %panic, backtrace = %backtrace),
        }
        PANIC_COUNTER.inc();
        default_hook(panic);
    }));

    #[cfg(feature = "deadlock_detection")]
    let _ = std::thread::spawn(move || {
        loop {
            std::thread::sleep(Duration::from_secs(5));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            tracing::error!(count = deadlocks.len(), "Deadlocks detected");
            for (i, threads) in deadlocks.iter().enumerate() {
                for t in threads {
                    tracing::error!(
                        deadlock = i,
                        thread_id = ?t.thread_id(),
                        backtrace = ?t.backtrace(),
                        "Deadlocked thread"
                    );
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_hook_counts_panics() {
        set_panic_hook();
        let before = PANIC_COUNTER.get();
        let result = std::panic::catch_unwind(|| panic!("expected test panic"));
        assert!(result.is_err());
        assert_eq!(PANIC_COUNTER.get(), before + 1);
        let _ = panic::take_hook();
    }
}
