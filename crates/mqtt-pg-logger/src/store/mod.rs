/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

// src/store/mod.rs
// The asynchronous batching front of the message store. BatchWriter
// owns a bounded FIFO queue and a background task that drains it in
// batches, runs the periodic cleanup, recycles stale connections and
// retries after errors without taking the service down.

mod db;
mod encode;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error};

use crate::config::DatabaseSettings;
use crate::errors::DatabaseError;
use crate::lifecycle::Lifecycle;
use crate::message::Message;

pub use db::MessageStore;
pub(crate) use db::open_connection;

pub const QUEUE_LIMIT: usize = 50_000;

const RECONNECT_AFTER_SECONDS: i64 = 3600;
const FORCE_CLEAN_UP_AFTER_SECONDS: i64 = 3000;
const LAZY_CLEAN_UP_AFTER_SECONDS: i64 = 300;

// The configured batch size and flush wait are clamped; a batch above
// 10k rows stops helping and only grows transactions.
const MAX_BATCH_SIZE: usize = 10_000;
const MAX_WAIT_SECONDS: u64 = 60;

const ERROR_BURST_THRESHOLD: u32 = 10;
const ERROR_BURST_SLEEP: Duration = Duration::from_secs(2);
const IDLE_STEP: Duration = Duration::from_millis(50);
const BUSY_STEP: Duration = Duration::from_micros(500);

struct QueueState {
    messages: VecDeque<Message>,
    write_immediately: bool,
}

// MessageQueue is the bounded FIFO between the runner and the writer
// task. It is the sole owner of records that are accepted but not yet
// persisted.
struct MessageQueue {
    state: Mutex<QueueState>,
    closing: AtomicBool,
    limit: usize,
}

impl MessageQueue {
    fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                write_immediately: false,
            }),
            closing: AtomicBool::new(false),
            limit,
        }
    }

    // push appends in order until the limit is reached and returns how
    // many messages of this call were dropped. Records already in the
    // queue are never dropped.
    fn push(&self, messages: Vec<Message>, write_immediately: bool) -> usize {
        let mut state = self.state.lock().unwrap();
        if write_immediately {
            state.write_immediately = true;
        }

        let total = messages.len();
        let mut added = 0;
        for message in messages {
            if state.messages.len() >= self.limit {
                break;
            }
            state.messages.push_back(message);
            added += 1;
        }
        total - added
    }

    // pop_batch removes up to `max` messages preserving FIFO order.
    // When the queue drains before the batch fills, the pending
    // force-flush request is considered served.
    fn pop_batch(&self, max: usize) -> Vec<Message> {
        let mut state = self.state.lock().unwrap();
        let mut batch = Vec::new();
        while batch.len() < max {
            match state.messages.pop_front() {
                Some(message) => batch.push(message),
                None => {
                    state.write_immediately = false;
                    break;
                }
            }
        }
        batch
    }

    // requeue_front puts a popped batch back at the head after a
    // failed insert, keeping the original order for the retry.
    fn requeue_front(&self, batch: Vec<Message>) {
        let mut state = self.state.lock().unwrap();
        for message in batch.into_iter().rev() {
            state.messages.push_front(message);
        }
    }

    fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    fn force_flush_requested(&self) -> bool {
        self.state.lock().unwrap().write_immediately
    }

    fn set_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

// BatchWriter starts its background task at construction; the task is
// the only place the database connection ever lives.
pub struct BatchWriter {
    queue: Arc<MessageQueue>,
    task: Option<JoinHandle<()>>,
}

impl BatchWriter {
    pub fn new(settings: DatabaseSettings, lifecycle: Lifecycle) -> Self {
        let batch_size = settings.batch_size.min(MAX_BATCH_SIZE);
        let wait_max_seconds = settings.wait_max_seconds.min(MAX_WAIT_SECONDS);

        let queue = Arc::new(MessageQueue::new(QUEUE_LIMIT));
        let store = MessageStore::new(settings, lifecycle);

        let task = tokio::spawn(run(store, queue.clone(), batch_size, wait_max_seconds));

        Self {
            queue,
            task: Some(task),
        }
    }

    // queue hands a drained listener buffer to the writer. Overflow is
    // logged once per call; the offending tail is dropped.
    pub fn queue(&self, messages: Vec<Message>, write_immediately: bool) {
        let lost = self.queue.push(messages, write_immediately);
        if lost > 0 {
            error!("message queue limit ({QUEUE_LIMIT}) reached => lost {lost} messages!");
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    // is_running lets the runner fail fast when the writer task died;
    // buffering messages nobody persists helps no one.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    // close asks the task to finish its current iteration and waits
    // for it. Messages still queued are not flushed.
    pub async fn close(&mut self) {
        self.queue.set_closing();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("journal writer task ended abnormally: {e}");
            }
        }
    }
}

async fn run(
    mut store: MessageStore,
    queue: Arc<MessageQueue>,
    batch_size: usize,
    wait_max_seconds: u64,
) {
    let mut consecutive_errors: u32 = 0;
    let mut last_error_text: Option<String> = None;

    while !queue.is_closing() {
        if consecutive_errors > ERROR_BURST_THRESHOLD {
            tokio::time::sleep(ERROR_BURST_SLEEP).await;
        }

        match run_iteration(
            &mut store,
            &queue,
            batch_size,
            wait_max_seconds,
            &mut last_error_text,
        )
        .await
        {
            Ok(busy) => {
                consecutive_errors = 0;
                tokio::time::sleep(if busy { BUSY_STEP } else { IDLE_STEP }).await;
            }
            Err(e) => {
                consecutive_errors += 1;
                let text = e.to_string();
                if last_error_text.as_deref() == Some(text.as_str()) {
                    error!("{text}");
                } else {
                    error!(error = ?e, "{text}");
                    last_error_text = Some(text);
                }
                // Drop the connection so the next iteration reconnects.
                store.close().await;
            }
        }
    }

    store.close().await;
}

async fn run_iteration(
    store: &mut MessageStore,
    queue: &MessageQueue,
    batch_size: usize,
    wait_max_seconds: u64,
    last_error_text: &mut Option<String>,
) -> Result<bool, DatabaseError> {
    let mut busy = false;

    if !store.is_connected() {
        store.connect().await?;
        busy = true;
    }

    if should_store(
        queue.len(),
        queue.force_flush_requested(),
        batch_size,
        store.last_store_time(),
        wait_max_seconds,
        Local::now(),
    ) {
        let batch = queue.pop_batch(batch_size);
        if !batch.is_empty() {
            if let Err(e) = store.store(&batch).await {
                // The batch was only borrowed from the queue; give it
                // back so nothing is lost across the reconnect.
                queue.requeue_front(batch);
                return Err(e);
            }
            busy = true;
        }
        *last_error_text = None;
    }

    if !busy
        && should_clean_up(
            queue.len(),
            store.clean_up_after_days(),
            store.last_clean_up_time(),
            store.last_store_time(),
            Local::now(),
        )
    {
        store.clean_up().await?;
        busy = true;
    }

    if let Some(connected_at) = store.last_connect_time() {
        if (Local::now() - connected_at).num_seconds() > RECONNECT_AFTER_SECONDS {
            debug!("automatically closing connection after {RECONNECT_AFTER_SECONDS}s");
            store.close().await;
            busy = true;
        }
    }

    Ok(busy)
}

// should_store decides whether the current iteration flushes: a
// pending force-flush, a full batch, or messages waiting longer than
// the configured maximum.
fn should_store(
    queue_len: usize,
    force_flush: bool,
    batch_size: usize,
    last_store_time: DateTime<Local>,
    wait_max_seconds: u64,
    now: DateTime<Local>,
) -> bool {
    if queue_len == 0 {
        return false;
    }
    if force_flush || queue_len >= batch_size {
        return true;
    }
    (now - last_store_time).num_milliseconds() > wait_max_seconds as i64 * 1000
}

// should_clean_up runs the retention delete either on the forced
// schedule or lazily when the pipeline is quiet; a burst in progress
// (recent store, non-empty queue) defers the lazy variant.
fn should_clean_up(
    queue_len: usize,
    clean_up_after_days: i32,
    last_clean_up_time: DateTime<Local>,
    last_store_time: DateTime<Local>,
    now: DateTime<Local>,
) -> bool {
    if clean_up_after_days <= 0 {
        return false;
    }

    let since_clean_up = (now - last_clean_up_time).num_seconds();
    if since_clean_up >= FORCE_CLEAN_UP_AFTER_SECONDS {
        return true;
    }

    queue_len == 0
        && since_clean_up > LAZY_CLEAN_UP_AFTER_SECONDS
        && (now - last_store_time).num_milliseconds() > 1000
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn message(id: i32) -> Message {
        Message {
            message_id: id,
            topic: format!("topic-{id}"),
            text: format!("text-{id}"),
            qos: 1,
            retain: false,
            time: Local::now(),
        }
    }

    fn messages(range: std::ops::Range<i32>) -> Vec<Message> {
        range.map(message).collect()
    }

    #[test]
    fn queue_preserves_fifo_order() {
        let queue = MessageQueue::new(10);
        assert_eq!(queue.push(messages(0..4), false), 0);

        let batch = queue.pop_batch(2);
        assert_eq!(
            batch.iter().map(|m| m.message_id).collect::<Vec<_>>(),
            vec![0, 1]
        );
        let batch = queue.pop_batch(10);
        assert_eq!(
            batch.iter().map(|m| m.message_id).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn queue_drops_excess_tail_and_counts_losses() {
        let queue = MessageQueue::new(5);
        assert_eq!(queue.push(messages(0..8), false), 3);
        assert_eq!(queue.len(), 5);

        // Accepted records survive; the dropped ones were the tail.
        let ids: Vec<i32> = queue.pop_batch(10).iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn queue_rejects_everything_once_full() {
        let queue = MessageQueue::new(3);
        assert_eq!(queue.push(messages(0..3), false), 0);
        assert_eq!(queue.push(messages(3..6), false), 3);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn force_flush_clears_only_when_drained() {
        let queue = MessageQueue::new(10);
        queue.push(messages(0..4), true);
        assert!(queue.force_flush_requested());

        // Batch filled before the queue drained: request stays up.
        queue.pop_batch(2);
        assert!(queue.force_flush_requested());

        // Queue drained below the batch size: request served.
        queue.pop_batch(4);
        assert!(!queue.force_flush_requested());
    }

    #[test]
    fn requeue_front_restores_original_order() {
        let queue = MessageQueue::new(10);
        queue.push(messages(0..5), false);

        let batch = queue.pop_batch(3);
        queue.requeue_front(batch);

        let ids: Vec<i32> = queue.pop_batch(10).iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn store_decision_honors_thresholds() {
        let now = Local::now();
        let fresh = now - TimeDelta::seconds(1);
        let stale = now - TimeDelta::seconds(11);

        // Empty queue never flushes, not even when forced.
        assert!(!should_store(0, true, 100, stale, 10, now));

        // Force flag flushes any non-empty queue.
        assert!(should_store(1, true, 100, fresh, 10, now));

        // A full batch flushes.
        assert!(should_store(100, false, 100, fresh, 10, now));
        assert!(!should_store(99, false, 100, fresh, 10, now));

        // Waiting past wait_max flushes whatever is there.
        assert!(should_store(1, false, 100, stale, 10, now));
    }

    #[test]
    fn clean_up_disabled_for_non_positive_retention() {
        let now = Local::now();
        let long_ago = now - TimeDelta::seconds(10_000);
        assert!(!should_clean_up(0, 0, long_ago, long_ago, now));
        assert!(!should_clean_up(0, -5, long_ago, long_ago, now));
    }

    #[test]
    fn clean_up_forced_after_deadline() {
        let now = Local::now();
        let over = now - TimeDelta::seconds(FORCE_CLEAN_UP_AFTER_SECONDS);
        let under = now - TimeDelta::seconds(FORCE_CLEAN_UP_AFTER_SECONDS - 1);
        let recent_store = now - TimeDelta::milliseconds(100);

        // Forced cleanup ignores queue depth and store recency.
        assert!(should_clean_up(50, 14, over, recent_store, now));
        assert!(!should_clean_up(50, 14, under, recent_store, now));
    }

    #[test]
    fn lazy_clean_up_waits_for_quiet_pipeline() {
        let now = Local::now();
        let lazy = now - TimeDelta::seconds(LAZY_CLEAN_UP_AFTER_SECONDS + 1);
        let old_store = now - TimeDelta::seconds(2);
        let recent_store = now - TimeDelta::milliseconds(500);

        assert!(should_clean_up(0, 14, lazy, old_store, now));

        // A burst in progress defers the lazy run.
        assert!(!should_clean_up(1, 14, lazy, old_store, now));
        assert!(!should_clean_up(0, 14, lazy, recent_store, now));
    }
}
