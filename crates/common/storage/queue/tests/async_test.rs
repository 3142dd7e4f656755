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

mod common;

use std::{sync::Arc, time::Duration};

use common::{Fault, FaultyFileSystem, data_files};
use spool_queue::{CancellationToken, PersistedQueue, QueueBuilder};
use tempfile::TempDir;

fn open(dir: &TempDir) -> PersistedQueue<u64> {
    spool_common_telemetry::init_default_ut_logging();
    QueueBuilder::new(dir.path())
        .lock_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_async_fifo() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(&temp_dir);
    let cancel = CancellationToken::new();

    for i in 0..20 {
        queue.enqueue_async(&i, &cancel).await.unwrap();
    }
    assert_eq!(queue.count_async().await.unwrap(), 20);
    assert_eq!(queue.peek_async(&cancel).await.unwrap(), 0);
    for i in 0..20 {
        assert_eq!(queue.dequeue_async(&cancel).await.unwrap(), i);
    }
    assert_eq!(queue.try_dequeue_async(&cancel).await.unwrap(), None);
    assert_eq!(queue.try_peek_async(&cancel).await.unwrap(), None);
}

#[tokio::test]
async fn test_async_action_commit_and_failure() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(&temp_dir);
    let cancel = CancellationToken::new();
    queue.enqueue_many(&[1, 2]).unwrap();

    let failed = queue
        .dequeue_with_action_async(|_| async { Err::<(), _>("downstream unavailable") }, &cancel)
        .await
        .unwrap();
    assert!(!failed);
    assert_eq!(queue.count().unwrap(), 2);

    let committed = queue
        .dequeue_with_action_async(
            |item| async move {
                assert_eq!(item, 1);
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, String>(())
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(committed);
    assert_eq!(queue.snapshot_async(&cancel).await.unwrap(), vec![2]);
}

#[tokio::test]
async fn test_async_batch_with_running_total() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(&temp_dir);
    let cancel = CancellationToken::new();
    queue.enqueue_many(&[10, 20, 30, 40]).unwrap();

    // Take items while the running total stays at or below 35.
    let mut total = 0u64;
    let committed = queue
        .dequeue_while_with_action_async(
            &mut total,
            |item, total| {
                if *total + item > 35 {
                    return false;
                }
                *total += item;
                true
            },
            |batch| async move {
                assert_eq!(batch, vec![10, 20]);
                Ok::<_, String>(())
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(committed, 2);
    assert_eq!(total, 30);
    assert_eq!(queue.snapshot().unwrap(), vec![30, 40]);
}

#[tokio::test]
async fn test_cancelled_token_leaves_queue_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(&temp_dir);
    queue.enqueue_many(&[1, 2, 3]).unwrap();
    let files = data_files(queue.data_dir());

    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(queue.dequeue_async(&cancel).await.unwrap_err().is_cancelled());
    assert!(queue.enqueue_async(&4, &cancel).await.unwrap_err().is_cancelled());
    assert!(queue.clear_async(&cancel).await.unwrap_err().is_cancelled());
    let err = queue
        .dequeue_while_with_action_async(
            &mut (),
            |_, _| true,
            |_| async { Ok::<_, String>(()) },
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    assert_eq!(data_files(queue.data_dir()), files);
}

#[tokio::test]
async fn test_cancel_during_scan_skips_action() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(&temp_dir);
    queue.enqueue_many(&[1, 2, 3]).unwrap();

    let cancel = CancellationToken::new();
    let mut action_ran = false;
    let err = queue
        .dequeue_while_with_action_async(
            &mut (),
            |item, _| {
                if *item == 2 {
                    cancel.cancel();
                }
                true
            },
            |_| {
                action_ran = true;
                async { Ok::<_, String>(()) }
            },
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!action_ran);
    assert_eq!(queue.count().unwrap(), 3);
}

#[tokio::test]
async fn test_cancel_after_action_still_commits() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(&temp_dir);
    queue.enqueue_many(&[1, 2]).unwrap();

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let committed = queue
        .dequeue_while_with_action_async(
            &mut (),
            |_, _| true,
            |batch| async move {
                assert_eq!(batch.len(), 2);
                token.cancel();
                Ok::<_, String>(())
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(committed, 2);
    assert!(queue.is_empty().unwrap());
}

#[tokio::test]
async fn test_async_quarantine_and_exclusion() {
    let temp_dir = TempDir::new().unwrap();
    let fs = Arc::new(FaultyFileSystem::default());
    let queue: PersistedQueue<u64> = QueueBuilder::new(temp_dir.path())
        .file_system(fs.clone())
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    queue.enqueue_many(&[1, 2, 3]).unwrap();
    let files = data_files(queue.data_dir());

    std::fs::write(queue.data_dir().join(&files[0]), b"not a number").unwrap();
    for fault in [Fault::DenyRead, Fault::DenyRename, Fault::DenyDelete] {
        fs.inject(&files[1], fault);
    }

    assert_eq!(queue.dequeue_async(&cancel).await.unwrap(), 3);
    assert_eq!(queue.poison_files().unwrap(), vec![files[0].clone()]);
    assert_eq!(queue.excluded_files(), vec![files[1].clone()]);

    fs.heal(&files[1]);
    std::fs::remove_file(queue.data_dir().join(&files[1])).unwrap();
    assert_eq!(queue.heal_exclusions_async().await, 1);
}

#[tokio::test]
async fn test_async_action_skips_corrupt_head() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(&temp_dir);
    let cancel = CancellationToken::new();
    queue.enqueue_many(&[1, 2, 3]).unwrap();
    let files = data_files(queue.data_dir());
    std::fs::write(queue.data_dir().join(&files[0]), b"not a number").unwrap();

    let failed = queue
        .dequeue_with_action_async(|_| async { Err::<(), _>("downstream unavailable") }, &cancel)
        .await
        .unwrap();
    assert!(!failed);
    assert_eq!(queue.poison_files().unwrap(), vec![files[0].clone()]);
    assert_eq!(queue.count_async().await.unwrap(), 2);

    let committed = queue
        .dequeue_with_action_async(
            |item| async move {
                assert_eq!(item, 2);
                Ok::<_, String>(())
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(committed);
    assert_eq!(queue.snapshot_async(&cancel).await.unwrap(), vec![3]);
}

#[tokio::test]
async fn test_async_batch_skips_corrupt_file_between_items() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(&temp_dir);
    let cancel = CancellationToken::new();
    queue.enqueue_many(&[1, 2, 3]).unwrap();
    let files = data_files(queue.data_dir());
    std::fs::write(queue.data_dir().join(&files[1]), b"not a number").unwrap();

    let committed = queue
        .dequeue_while_with_action_async(
            &mut (),
            |_, _| true,
            |batch| async move {
                assert_eq!(batch, vec![1, 3]);
                Ok::<_, String>(())
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(committed, 2);
    assert!(queue.is_empty().unwrap());
    assert_eq!(queue.poison_files().unwrap(), vec![files[1].clone()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_and_blocking_callers_share_the_queue() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(&temp_dir);

    let blocking = {
        let queue = queue.clone();
        tokio::task::spawn_blocking(move || {
            for i in 0..50 {
                queue.enqueue(&i).unwrap();
            }
        })
    };
    let tasks: Vec<_> = (0..4)
        .map(|t| {
            let queue = queue.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                for i in 0..25 {
                    queue.enqueue_async(&(1000 + t * 100 + i), &cancel).await.unwrap();
                }
            })
        })
        .collect();

    blocking.await.unwrap();
    for task in tasks {
        task.await.unwrap();
    }

    let cancel = CancellationToken::new();
    assert_eq!(queue.count_async().await.unwrap(), 150);
    assert_eq!(queue.clear_async(&cancel).await.unwrap(), 150);
    assert!(queue.is_empty().unwrap());
}
