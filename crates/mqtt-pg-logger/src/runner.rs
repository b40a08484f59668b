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

// src/runner.rs
// Top-level supervisor: couples the listener's drained batches to the
// writer queue and owns the orderly shutdown of both.

use tokio::time::Duration;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::lifecycle::{Lifecycle, StatusEvent};
use crate::listener::MqttListener;
use crate::store::BatchWriter;

const IDLE_STEP: Duration = Duration::from_millis(50);
const BUSY_STEP: Duration = Duration::from_micros(500);

pub struct Runner {
    listener: MqttListener,
    writer: BatchWriter,
    lifecycle: Lifecycle,
}

impl Runner {
    // new starts the writer (its background task begins connecting
    // right away) and connects the listener, blocking until the
    // subscription is up.
    pub async fn new(config: &AppConfig, lifecycle: Lifecycle) -> Result<Self, ServiceError> {
        let writer = BatchWriter::new(config.database.clone(), lifecycle.clone());

        let mut listener = MqttListener::new(config.mqtt.clone(), lifecycle.clone())?;
        listener.connect().await?;

        Ok(Self {
            listener,
            writer,
            lifecycle,
        })
    }

    // run polls the listener until the lifecycle says stop. A drained
    // batch makes the iteration busy; the first empty drain after a
    // busy stretch emits RunnerQueueEmptied for test synchronization.
    pub async fn run(&mut self) -> Result<(), ServiceError> {
        let mut had_messages = false;

        while self.lifecycle.should_proceed() {
            if !self.writer.is_running() {
                return Err(ServiceError::WriterStopped);
            }

            let messages = self.listener.get_messages()?;
            let busy = !messages.is_empty();

            if busy {
                had_messages = true;
                self.writer.queue(messages, false);
            } else if had_messages {
                had_messages = false;
                self.lifecycle.notify(StatusEvent::RunnerQueueEmptied);
            }

            self.lifecycle
                .sleep(if busy { BUSY_STEP } else { IDLE_STEP })
                .await;
        }

        debug!("finishing...");
        Ok(())
    }

    // close stops the listener first so no new messages arrive while
    // the writer finishes its last iteration.
    pub async fn close(&mut self) {
        self.listener.close().await;
        self.writer.close().await;
    }
}
