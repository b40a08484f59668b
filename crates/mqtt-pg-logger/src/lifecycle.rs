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

// src/lifecycle.rs
// Process-wide "proceed/stop" coordination shared by every loop of the
// service, plus the status-event dispatch used by integration tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::Duration;
use tracing::info;

// StatusEvent names the observable milestones of the pipeline. In
// production nothing listens to them; tests install an observer and
// await specific sets to synchronize without sleeping blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusEvent {
    MessageStoreConnected,
    MessageStoreClosed,
    MessageStoreStored,
    MqttListenerConnected,
    MqttListenerSubscribed,
    MqttPublisherConnected,
    RunnerQueueEmptied,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusEvent::MessageStoreConnected => "MESSAGE_STORE_CONNECTED",
            StatusEvent::MessageStoreClosed => "MESSAGE_STORE_CLOSED",
            StatusEvent::MessageStoreStored => "MESSAGE_STORE_STORED",
            StatusEvent::MqttListenerConnected => "MQTT_LISTENER_CONNECTED",
            StatusEvent::MqttListenerSubscribed => "MQTT_LISTENER_SUBSCRIBED",
            StatusEvent::MqttPublisherConnected => "MQTT_PUBLISHER_CONNECTED",
            StatusEvent::RunnerQueueEmptied => "RUNNER_QUEUE_EMPTIED",
        };
        f.write_str(name)
    }
}

// StatusObserver receives every notify() call. Implementations must be
// cheap and non-blocking; they run inline on the notifying task.
pub trait StatusObserver: Send + Sync {
    fn notify(&self, event: StatusEvent);
}

struct LifecycleInner {
    proceed: AtomicBool,
    observer: Option<Arc<dyn StatusObserver>>,
}

// Lifecycle is a cheap cloneable handle; all clones share the same
// proceed flag and observer. It is passed through the constructors of
// the listener, the writer and the runner instead of living in a
// global, so tests can host several isolated services in one process.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<LifecycleInner>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::build(None)
    }

    // with_observer wires a status observer in; used by tests that
    // wait for event sets.
    pub fn with_observer(observer: Arc<dyn StatusObserver>) -> Self {
        Self::build(Some(observer))
    }

    fn build(observer: Option<Arc<dyn StatusObserver>>) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                proceed: AtomicBool::new(true),
                observer,
            }),
        }
    }

    pub fn should_proceed(&self) -> bool {
        self.inner.proceed.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.inner.proceed.store(false, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.inner.proceed.store(true, Ordering::SeqCst);
    }

    pub fn notify(&self, event: StatusEvent) {
        if let Some(observer) = &self.inner.observer {
            observer.notify(event);
        }
    }

    // sleep is routed through the handle so every cooperative wait in
    // the service shares one primitive; under `tokio::time::pause` the
    // whole service can be driven deterministically.
    pub async fn sleep(&self, duration: Duration) -> Duration {
        tokio::time::sleep(duration).await;
        duration
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// install_signal_handlers registers SIGINT/SIGTERM listeners that flip
// the proceed flag. Called from main only; worker-task hosted services
// (integration tests) must not install handlers.
pub fn install_signal_handlers(lifecycle: &Lifecycle) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let lifecycle = lifecycle.clone();
    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            info!("shutdown signaled ({name})");
            lifecycle.shutdown();
        }
    });

    Ok(())
}
