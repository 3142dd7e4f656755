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

//! Reader-writer lock with upgradeable reads and bounded waits.
//!
//! The queue needs three grants that `std` and `tokio` locks do not offer
//! together:
//! - shared reads for peeks and scans,
//! - exclusive writes for enqueue and commit deletes,
//! - an upgradeable read that admits concurrent readers while its holder runs
//!   a caller action, and can later be escalated to exclusive access without
//!   letting another writer in between.
//!
//! Every acquisition carries a timeout and fails fast with
//! [`QueueError::LockTimeout`] instead of waiting forever. The same lock can be
//! used from blocking threads (parked on a `parking_lot` condvar) and from
//! async tasks (parked on a `tokio` notify), so sync and async queue
//! operations exclude each other correctly.
//!
//! Guards own an `Arc` to the lock state and release on drop, including
//! during unwinding and when an async acquisition future is dropped.

use std::{
    fmt,
    pin::pin,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::{Result, error::LockTimeoutSnafu, metrics};

/// The kind of grant being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
    UpgradableRead,
    /// Escalation of an upgradeable read to exclusive access.
    Upgrade,
}

impl LockMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::UpgradableRead => "upgradable_read",
            Self::Upgrade => "upgrade",
        }
    }

    /// Whether a waiter in this mode blocks newly arriving readers.
    const fn is_exclusive(self) -> bool { matches!(self, Self::Write | Self::Upgrade) }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Default)]
struct LockState {
    readers:         usize,
    writer:          bool,
    upgradable:      bool,
    upgrading:       bool,
    writers_waiting: usize,
}

impl LockState {
    const fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => !self.writer && !self.upgrading && self.writers_waiting == 0,
            LockMode::Write => !self.writer && !self.upgradable && self.readers == 0,
            LockMode::UpgradableRead => {
                !self.writer && !self.upgradable && self.writers_waiting == 0
            }
            // The upgrading holder already excludes writers and other upgraders.
            LockMode::Upgrade => self.readers == 0,
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers += 1,
            LockMode::Write => self.writer = true,
            LockMode::UpgradableRead => self.upgradable = true,
            LockMode::Upgrade => {
                self.upgradable = false;
                self.upgrading = false;
                self.writer = true;
            }
        }
    }

    fn begin_wait(&mut self, mode: LockMode) {
        match mode {
            LockMode::Write => self.writers_waiting += 1,
            LockMode::Upgrade => self.upgrading = true,
            LockMode::Read | LockMode::UpgradableRead => {}
        }
    }

    fn end_wait(&mut self, mode: LockMode) {
        match mode {
            LockMode::Write => self.writers_waiting -= 1,
            LockMode::Upgrade => self.upgrading = false,
            LockMode::Read | LockMode::UpgradableRead => {}
        }
    }
}

#[derive(Debug)]
struct Inner {
    state:  Mutex<LockState>,
    cond:   Condvar,
    notify: Notify,
}

impl Inner {
    fn wake_all(&self) {
        self.cond.notify_all();
        self.notify.notify_waiters();
    }

    fn release(&self, f: impl FnOnce(&mut LockState)) {
        f(&mut self.state.lock());
        self.wake_all();
    }
}

/// Tracks a pending exclusive request so it is withdrawn even if the waiting
/// thread times out or the waiting future is dropped.
struct PendingWait<'a> {
    inner:  &'a Inner,
    mode:   LockMode,
    active: bool,
}

impl<'a> PendingWait<'a> {
    fn register(inner: &'a Inner, state: &mut LockState, mode: LockMode) -> Self {
        state.begin_wait(mode);
        Self {
            inner,
            mode,
            active: mode.is_exclusive(),
        }
    }

    /// Grants `mode`; the pending marker is cleared in the same critical
    /// section.
    fn grant(mut self, state: &mut LockState) {
        if self.active {
            state.end_wait(self.mode);
            self.active = false;
        }
        state.grant(self.mode);
    }
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        if self.active {
            self.inner.release(|state| state.end_wait(self.mode));
        }
    }
}

/// Reader-writer lock guarding one queue directory.
#[derive(Clone)]
pub struct QueueLock {
    inner:   Arc<Inner>,
    timeout: Duration,
}

impl fmt::Debug for QueueLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("QueueLock")
            .field("timeout", &self.timeout)
            .field("state", &*state)
            .finish()
    }
}

impl QueueLock {
    /// Create a lock whose acquisitions give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state:  Mutex::new(LockState::default()),
                cond:   Condvar::new(),
                notify: Notify::new(),
            }),
            timeout,
        }
    }

    pub const fn timeout(&self) -> Duration { self.timeout }

    /// Acquire shared access, blocking the current thread.
    pub fn read(&self) -> Result<ReadGuard> {
        acquire_blocking(&self.inner, LockMode::Read, self.timeout)?;
        Ok(ReadGuard {
            inner: self.inner.clone(),
        })
    }

    /// Acquire exclusive access, blocking the current thread.
    pub fn write(&self) -> Result<WriteGuard> {
        acquire_blocking(&self.inner, LockMode::Write, self.timeout)?;
        Ok(WriteGuard {
            inner: self.inner.clone(),
        })
    }

    /// Acquire an upgradeable read, blocking the current thread.
    pub fn upgradable_read(&self) -> Result<UpgradableGuard> {
        acquire_blocking(&self.inner, LockMode::UpgradableRead, self.timeout)?;
        Ok(UpgradableGuard {
            inner:   Some(self.inner.clone()),
            timeout: self.timeout,
        })
    }

    /// Acquire shared access without blocking the runtime thread.
    pub async fn read_async(&self) -> Result<ReadGuard> {
        acquire_async(&self.inner, LockMode::Read, self.timeout).await?;
        Ok(ReadGuard {
            inner: self.inner.clone(),
        })
    }

    /// Acquire exclusive access without blocking the runtime thread.
    pub async fn write_async(&self) -> Result<WriteGuard> {
        acquire_async(&self.inner, LockMode::Write, self.timeout).await?;
        Ok(WriteGuard {
            inner: self.inner.clone(),
        })
    }

    /// Acquire an upgradeable read without blocking the runtime thread.
    pub async fn upgradable_read_async(&self) -> Result<UpgradableGuard> {
        acquire_async(&self.inner, LockMode::UpgradableRead, self.timeout).await?;
        Ok(UpgradableGuard {
            inner:   Some(self.inner.clone()),
            timeout: self.timeout,
        })
    }
}

fn timed_out(mode: LockMode, timeout: Duration) -> Result<()> {
    metrics::LOCK_TIMEOUTS
        .with_label_values(&[mode.as_str()])
        .inc();
    tracing::warn!(%mode, ?timeout, "Lock acquisition timed out");
    LockTimeoutSnafu { mode, timeout }.fail()
}

fn acquire_blocking(inner: &Inner, mode: LockMode, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut state = inner.state.lock();
    if state.admits(mode) {
        state.grant(mode);
        return Ok(());
    }

    let pending = PendingWait::register(inner, &mut state, mode);
    loop {
        let result = inner.cond.wait_until(&mut state, deadline);
        if state.admits(mode) {
            pending.grant(&mut state);
            return Ok(());
        }
        if result.timed_out() {
            drop(state);
            drop(pending);
            return timed_out(mode, timeout);
        }
    }
}

async fn acquire_async(inner: &Inner, mode: LockMode, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut pending = None;
    loop {
        let mut notified = pin!(inner.notify.notified());
        notified.as_mut().enable();
        {
            let mut state = inner.state.lock();
            if state.admits(mode) {
                match pending.take() {
                    Some(pending) => PendingWait::grant(pending, &mut state),
                    None => state.grant(mode),
                }
                return Ok(());
            }
            if pending.is_none() {
                pending = Some(PendingWait::register(inner, &mut state, mode));
            }
        }
        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            {
                let mut state = inner.state.lock();
                if state.admits(mode) {
                    match pending.take() {
                        Some(pending) => PendingWait::grant(pending, &mut state),
                        None => state.grant(mode),
                    }
                    return Ok(());
                }
            }
            drop(pending);
            return timed_out(mode, timeout);
        }
    }
}

/// Shared access. Released on drop.
#[derive(Debug)]
pub struct ReadGuard {
    inner: Arc<Inner>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) { self.inner.release(|state| state.readers -= 1); }
}

/// Exclusive access. Released on drop.
#[derive(Debug)]
pub struct WriteGuard {
    inner: Arc<Inner>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) { self.inner.release(|state| state.writer = false); }
}

/// Upgradeable read access. Released on drop unless upgraded.
///
/// While held, readers may still enter but writers and other upgradeable
/// readers wait.
#[derive(Debug)]
pub struct UpgradableGuard {
    inner:   Option<Arc<Inner>>,
    timeout: Duration,
}

impl UpgradableGuard {
    /// Escalate to exclusive access once all current readers have left.
    ///
    /// On timeout the upgradeable grant is released as well.
    pub fn upgrade(mut self) -> Result<WriteGuard> {
        let Some(inner) = self.inner.take() else {
            unreachable!("upgradable guard without lock state");
        };
        if let Err(err) = acquire_blocking(&inner, LockMode::Upgrade, self.timeout) {
            release_upgradable(&inner);
            return Err(err);
        }
        Ok(WriteGuard { inner })
    }

    /// Async counterpart of [`upgrade`](Self::upgrade).
    pub async fn upgrade_async(mut self) -> Result<WriteGuard> {
        let Some(inner) = self.inner.clone() else {
            unreachable!("upgradable guard without lock state");
        };
        // `self` keeps the grant alive until the upgrade completes, so a
        // dropped future releases it through `Drop`.
        acquire_async(&inner, LockMode::Upgrade, self.timeout).await?;
        self.inner = None;
        Ok(WriteGuard { inner })
    }
}

fn release_upgradable(inner: &Inner) {
    inner.release(|state| {
        state.upgradable = false;
        state.upgrading = false;
    });
}

impl Drop for UpgradableGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            release_upgradable(&inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
    };

    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_readers_share() {
        let lock = QueueLock::new(SHORT);
        let _a = lock.read().unwrap();
        let _b = lock.read().unwrap();
        assert!(lock.write().unwrap_err().is_lock_timeout());
    }

    #[test]
    fn test_write_excludes_everything() {
        let lock = QueueLock::new(SHORT);
        let guard = lock.write().unwrap();
        assert!(lock.read().unwrap_err().is_lock_timeout());
        assert!(lock.upgradable_read().unwrap_err().is_lock_timeout());
        drop(guard);
        assert!(lock.read().is_ok());
    }

    #[test]
    fn test_upgradable_admits_readers_but_not_writers() {
        let lock = QueueLock::new(SHORT);
        let upgradable = lock.upgradable_read().unwrap();
        let reader = lock.read().unwrap();
        assert!(lock.write().unwrap_err().is_lock_timeout());
        assert!(lock.upgradable_read().unwrap_err().is_lock_timeout());
        drop(reader);
        let _write = upgradable.upgrade().unwrap();
        assert!(lock.read().unwrap_err().is_lock_timeout());
    }

    #[test]
    fn test_upgrade_times_out_while_reader_held() {
        let lock = QueueLock::new(SHORT);
        let upgradable = lock.upgradable_read().unwrap();
        let reader = lock.read().unwrap();
        let err = upgradable.upgrade().unwrap_err();
        assert!(err.is_lock_timeout());
        drop(reader);
        // The failed upgrade released the upgradeable grant.
        assert!(lock.write().is_ok());
    }

    #[test]
    fn test_timed_out_writer_unblocks_readers() {
        let lock = QueueLock::new(SHORT);
        let reader = lock.read().unwrap();
        assert!(lock.write().unwrap_err().is_lock_timeout());
        let _second = lock.read().unwrap();
        drop(reader);
    }

    #[test]
    fn test_waiting_writer_is_woken_on_release() {
        let lock = QueueLock::new(Duration::from_secs(5));
        let reader = lock.read().unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let lock = lock.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let _guard = lock.write().unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(reader);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_async_and_blocking_exclude_each_other() {
        let lock = QueueLock::new(SHORT);
        let write = lock.write_async().await.unwrap();
        let blocking = lock.clone();
        let err = tokio::task::spawn_blocking(move || blocking.read().map(|_| ()))
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_lock_timeout());
        drop(write);
        assert!(lock.read_async().await.is_ok());
    }

    #[tokio::test]
    async fn test_async_upgrade() {
        let lock = QueueLock::new(SHORT);
        let upgradable = lock.upgradable_read_async().await.unwrap();
        let reader = lock.read_async().await.unwrap();
        drop(reader);
        let _write = upgradable.upgrade_async().await.unwrap();
        assert!(lock.read_async().await.unwrap_err().is_lock_timeout());
    }

    #[tokio::test]
    async fn test_dropped_async_waiter_withdraws() {
        let lock = QueueLock::new(Duration::from_secs(5));
        let reader = lock.read_async().await.unwrap();
        {
            let pending = lock.write_async();
            let res = tokio::time::timeout(Duration::from_millis(20), pending).await;
            assert!(res.is_err());
        }
        // The abandoned writer no longer blocks readers.
        let short = QueueLock {
            inner:   lock.inner.clone(),
            timeout: SHORT,
        };
        assert!(short.read_async().await.is_ok());
        drop(reader);
    }
}
