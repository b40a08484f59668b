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

// src/listener/mod.rs
// The MQTT side of the bridge: connects, subscribes, filters inbound
// topics and buffers accepted messages until the runner drains them.
//
// The client library owns the network loop (a spawned task); all
// shared state between that task and the service is behind
// ListenerShared. Nothing here ever calls back into the client from
// inside an event handler.

mod options;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use regex::Regex;
use rumqttc::v5;
use rumqttc::v5::mqttbytes::v5 as v5packets;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Packet, QoS, SubscribeFilter,
    SubscribeReasonCode,
};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::config::MqttSettings;
use crate::errors::MqttError;
use crate::lifecycle::{Lifecycle, StatusEvent};
use crate::message::Message;

use options::ClientBundle;

const SUBSCRIBE_WAIT_STEP: Duration = Duration::from_millis(50);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(15);

// Interval between "overall messages" status logs.
const STATUS_LOG_INTERVAL_SECONDS: i64 = 300;

// TopicFilter decides which received messages enter the pipeline.
pub(crate) struct TopicFilter {
    skip: Vec<Regex>,
    filter_message_id_0: bool,
}

impl TopicFilter {
    pub(crate) fn new(
        patterns: &[String],
        filter_message_id_0: bool,
    ) -> Result<Self, MqttError> {
        let skip = patterns
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| Regex::new(p).map_err(|e| MqttError::Pattern(format!("{p}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            skip,
            filter_message_id_0,
        })
    }

    // A skip pattern rejects a topic when it matches at the start of
    // the topic string.
    pub(crate) fn accepts_topic(&self, topic: &str) -> bool {
        for regex in &self.skip {
            if regex.find(topic).is_some_and(|m| m.start() == 0) {
                debug!("skipped topic: \"{topic}\"");
                return false;
            }
        }
        true
    }

    pub(crate) fn accepts(&self, topic: &str, message_id: i32) -> bool {
        if !self.accepts_topic(topic) {
            return false;
        }
        // Message id 0 is reserved as invalid in MQTT v3.
        !(self.filter_message_id_0 && message_id <= 0)
    }
}

// ListenerShared is everything the event-loop task and the service
// side both touch. The pending buffer mutex is the listener's only
// lock and is never held across an await.
struct ListenerShared {
    connected: AtomicBool,
    subscribed: AtomicBool,
    subscribe_failed: AtomicBool,
    shutdown: AtomicBool,
    error_info: Mutex<Option<String>>,
    pending: Mutex<Vec<Message>>,
    filter: TopicFilter,
    received_total: AtomicU64,
    skipped_total: AtomicU64,
    last_status_log: Mutex<DateTime<Local>>,
    lifecycle: Lifecycle,
}

impl ListenerShared {
    fn new(filter: TopicFilter, subscribed: bool, lifecycle: Lifecycle) -> Self {
        Self {
            connected: AtomicBool::new(false),
            subscribed: AtomicBool::new(subscribed),
            subscribe_failed: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            error_info: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            filter,
            received_total: AtomicU64::new(0),
            skipped_total: AtomicU64::new(0),
            last_status_log: Mutex::new(Local::now()),
            lifecycle,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn error_info(&self) -> Option<String> {
        self.error_info.lock().unwrap().clone()
    }

    fn on_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.lifecycle.notify(StatusEvent::MqttListenerConnected);
        debug!("listener connected");
    }

    fn on_connect_rejected(&self, code: &str) {
        let info = format!("listener connection failed ({code})!");
        error!("{info}");
        self.connected.store(false, Ordering::SeqCst);
        self.error_info.lock().unwrap().replace(info);
    }

    fn on_suback(&self, success: bool, detail: &str) {
        if success {
            self.subscribed.store(true, Ordering::SeqCst);
            self.lifecycle.notify(StatusEvent::MqttListenerSubscribed);
            info!("subscribed to MQTT topics ({detail})");
        } else {
            let info = format!("could not subscribe to MQTT topics: {detail}");
            error!("{info}");
            self.subscribe_failed.store(true, Ordering::SeqCst);
            self.error_info.lock().unwrap().replace(info);
        }
    }

    // on_disconnected covers both broker-initiated disconnects and
    // event-loop errors. The first recorded reason wins.
    fn on_disconnected(&self, reason: Option<&str>) {
        self.connected.store(false, Ordering::SeqCst);

        match reason {
            Some(reason) => {
                let info = format!("listener connection was lost ({reason}) => abort => restart!");
                error!("listener was unexpectedly disconnected: {info}");
                let mut error_info = self.error_info.lock().unwrap();
                if error_info.is_none() {
                    *error_info = Some(info);
                }
            }
            None => debug!("listener was disconnected"),
        }
    }

    fn on_publish(&self, topic: &str, payload: &[u8], packet_id: u16, qos: i16, retain: bool) {
        let accepted = match std::str::from_utf8(payload) {
            Ok(text) => {
                let message = Message {
                    message_id: packet_id as i32,
                    topic: topic.to_string(),
                    text: text.to_string(),
                    qos,
                    retain,
                    time: Local::now(),
                };
                trace!("message received: {message:?}");

                let accepted = self.filter.accepts(&message.topic, message.message_id);
                if accepted {
                    self.pending.lock().unwrap().push(message);
                }
                accepted
            }
            Err(e) => {
                warn!("dropping message on topic \"{topic}\": payload is not UTF-8 ({e})");
                false
            }
        };

        let received = self.received_total.fetch_add(1, Ordering::Relaxed) + 1;
        let skipped = if accepted {
            self.skipped_total.load(Ordering::Relaxed)
        } else {
            self.skipped_total.fetch_add(1, Ordering::Relaxed) + 1
        };
        self.maybe_log_status(received, skipped);
    }

    fn maybe_log_status(&self, received: u64, skipped: u64) {
        let now = Local::now();
        {
            let mut last = self.last_status_log.lock().unwrap();
            if (now - *last).num_seconds() <= STATUS_LOG_INTERVAL_SECONDS {
                return;
            }
            *last = now;
        }
        if skipped > 0 {
            info!("overall messages: received={received}; skipped={skipped}");
        } else {
            info!("overall messages: received={received}");
        }
    }

    fn take_pending(&self) -> Vec<Message> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }
}

enum Client {
    V4(AsyncClient),
    V5(v5::AsyncClient),
}

// MqttListener drives the subscription state machine
// DISCONNECTED -> CONNECTING -> CONNECTED -> SUBSCRIBED and hands
// drained message batches to the runner.
pub struct MqttListener {
    shared: Arc<ListenerShared>,
    client: Client,
    event_loop: Option<ClientBundleEventLoop>,
    event_task: Option<JoinHandle<()>>,
    subscriptions: Vec<String>,
    lifecycle: Lifecycle,
}

enum ClientBundleEventLoop {
    V4(EventLoop),
    V5(Box<v5::EventLoop>),
}

impl MqttListener {
    pub fn new(settings: MqttSettings, lifecycle: Lifecycle) -> Result<Self, MqttError> {
        let filter = TopicFilter::new(
            &settings.skip_subscription_regexes,
            settings.filter_message_id_0,
        )?;
        let subscriptions = settings.subscriptions.clone();

        // With nothing to subscribe to there is nothing to wait for.
        let shared = Arc::new(ListenerShared::new(
            filter,
            subscriptions.is_empty(),
            lifecycle.clone(),
        ));

        let (client, event_loop) = match options::build_client(&settings)? {
            ClientBundle::V4 { client, event_loop } => {
                (Client::V4(client), ClientBundleEventLoop::V4(event_loop))
            }
            ClientBundle::V5 { client, event_loop } => {
                (Client::V5(client), ClientBundleEventLoop::V5(event_loop))
            }
        };

        Ok(Self {
            shared,
            client,
            event_loop: Some(event_loop),
            event_task: None,
            subscriptions,
            lifecycle,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
            && self.shared.subscribed.load(Ordering::SeqCst)
    }

    // connect spawns the network loop and waits (in lifecycle sleeps)
    // until the subscription is acknowledged, bounded by ~15 seconds.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self.event_loop.take().ok_or(MqttError::AlreadyStarted)?;
        let task = match event_loop {
            ClientBundleEventLoop::V4(event_loop) => spawn_v4_loop(self.shared.clone(), event_loop),
            ClientBundleEventLoop::V5(event_loop) => spawn_v5_loop(self.shared.clone(), event_loop),
        };
        self.event_task = Some(task);
        debug!("listener is connecting...");

        let mut subscribe_sent = false;
        let mut waited = Duration::ZERO;

        while self.lifecycle.should_proceed() && !self.shared.is_shutdown() {
            if self.shared.subscribed.load(Ordering::SeqCst) {
                return Ok(());
            }
            if self.shared.subscribe_failed.load(Ordering::SeqCst) {
                return Err(MqttError::SubscribeFailed(
                    self.shared.error_info().unwrap_or_default(),
                ));
            }
            if !subscribe_sent && self.shared.connected.load(Ordering::SeqCst) {
                self.subscribe().await?;
                subscribe_sent = true;
            }

            waited += self.lifecycle.sleep(SUBSCRIBE_WAIT_STEP).await;
            if waited > SUBSCRIBE_TIMEOUT {
                return Err(MqttError::SubscribeTimeout(
                    self.shared.error_info().unwrap_or_default(),
                ));
            }
        }

        Ok(())
    }

    // One multi-topic subscribe for the whole configured set, QoS 1.
    async fn subscribe(&self) -> Result<(), MqttError> {
        match &self.client {
            Client::V4(client) => {
                let filters = self
                    .subscriptions
                    .iter()
                    .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce));
                client.subscribe_many(filters).await?;
            }
            Client::V5(client) => {
                let filters = self.subscriptions.iter().map(|topic| {
                    v5packets::Filter::new(topic.clone(), v5::mqttbytes::QoS::AtLeastOnce)
                });
                client.subscribe_many(filters).await?;
            }
        }
        Ok(())
    }

    // get_messages atomically drains the pending buffer. A dead
    // connection surfaces here so the service stops instead of
    // buffering into the void.
    pub fn get_messages(&self) -> Result<Vec<Message>, MqttError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            let info = self
                .shared
                .error_info()
                .unwrap_or_else(|| "MQTT is not connected!".to_string());
            return Err(MqttError::ConnectionLost(info));
        }
        Ok(self.shared.take_pending())
    }

    // close requests a disconnect and blocks until the network loop
    // has ended.
    pub async fn close(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);

        let result = match &self.client {
            Client::V4(client) => client.disconnect().await.map_err(MqttError::from),
            Client::V5(client) => client.disconnect().await.map_err(MqttError::from),
        };
        if let Err(e) = result {
            // The event loop may already be gone after a failure.
            debug!("disconnect request not deliverable: {e}");
        }

        if let Some(task) = self.event_task.take() {
            let _ = task.await;
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        debug!("listener was closed");
    }
}

fn spawn_v4_loop(shared: Arc<ListenerShared>, mut event_loop: EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if shared.is_shutdown() {
                break;
            }
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        shared.on_connected();
                    } else {
                        shared.on_connect_rejected(&format!("{:?}", ack.code));
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let failed = ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    shared.on_suback(!failed, &format!("{:?}", ack.return_codes));
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    shared.on_publish(
                        &publish.topic,
                        &publish.payload,
                        publish.pkid,
                        publish.qos as i16,
                        publish.retain,
                    );
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    shared.on_disconnected(Some("server disconnect"));
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if shared.is_shutdown() {
                        break;
                    }
                    shared.on_disconnected(Some(&e.to_string()));
                    break;
                }
            }
        }
        shared.connected.store(false, Ordering::SeqCst);
    })
}

fn spawn_v5_loop(shared: Arc<ListenerShared>, mut event_loop: Box<v5::EventLoop>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if shared.is_shutdown() {
                break;
            }
            match event_loop.poll().await {
                Ok(v5::Event::Incoming(v5packets::Packet::ConnAck(ack))) => {
                    if matches!(ack.code, v5packets::ConnectReturnCode::Success) {
                        shared.on_connected();
                    } else {
                        shared.on_connect_rejected(&format!("{:?}", ack.code));
                    }
                }
                Ok(v5::Event::Incoming(v5packets::Packet::SubAck(ack))) => {
                    let failed = ack.return_codes.iter().any(|code| {
                        !matches!(code, v5packets::SubscribeReasonCode::Success(_))
                    });
                    shared.on_suback(!failed, &format!("{:?}", ack.return_codes));
                }
                Ok(v5::Event::Incoming(v5packets::Packet::Publish(publish))) => {
                    let topic = String::from_utf8_lossy(&publish.topic).into_owned();
                    shared.on_publish(
                        &topic,
                        &publish.payload,
                        publish.pkid,
                        publish.qos as i16,
                        publish.retain,
                    );
                }
                Ok(v5::Event::Incoming(v5packets::Packet::Disconnect(disconnect))) => {
                    shared.on_disconnected(Some(&format!("{:?}", disconnect.reason_code)));
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if shared.is_shutdown() {
                        break;
                    }
                    shared.on_disconnected(Some(&e.to_string()));
                    break;
                }
            }
        }
        shared.connected.store(false, Ordering::SeqCst);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(patterns: &[&str]) -> TopicFilter {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        TopicFilter::new(&patterns, false).unwrap()
    }

    #[test]
    fn accepts_unmatched_topics() {
        let filter = filter(&["base1/exclude", "^base2/exclude"]);

        assert!(filter.accepts_topic("base1/include"));
        assert!(filter.accepts_topic("base1/include/exclude"));

        assert!(!filter.accepts_topic("base1/exclude"));
        assert!(!filter.accepts_topic("base1/exclude2"));
        assert!(!filter.accepts_topic("base1/exclude/2"));

        assert!(!filter.accepts_topic("base2/exclude"));
        assert!(!filter.accepts_topic("base2/exclude2"));
        assert!(!filter.accepts_topic("base2/exclude/2"));

        // Patterns are anchored at the topic start, not substrings.
        assert!(filter.accepts_topic("base1/include/base2/exclude"));
    }

    #[test]
    fn empty_pattern_list_accepts_everything() {
        let filter = filter(&[]);
        assert!(filter.accepts_topic("any/topic"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let patterns = vec!["base/(".to_string()];
        assert!(matches!(
            TopicFilter::new(&patterns, false),
            Err(MqttError::Pattern(_))
        ));
    }

    #[test]
    fn message_id_zero_filter() {
        let patterns: Vec<String> = Vec::new();
        let filtering = TopicFilter::new(&patterns, true).unwrap();
        let lenient = TopicFilter::new(&patterns, false).unwrap();

        assert!(!filtering.accepts("base/x", 0));
        assert!(filtering.accepts("base/x", 1));
        assert!(lenient.accepts("base/x", 0));
    }

    fn shared(patterns: &[&str], filter_message_id_0: bool) -> ListenerShared {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        ListenerShared::new(
            TopicFilter::new(&patterns, filter_message_id_0).unwrap(),
            false,
            Lifecycle::new(),
        )
    }

    #[test]
    fn publish_buffers_accepted_messages() {
        let shared = shared(&["base/skip"], false);

        shared.on_publish("base/in/a", b"text-1", 1, 1, false);
        shared.on_publish("base/skip/x", b"text-2", 2, 1, false);
        shared.on_publish("base/in/b", b"text-3", 3, 0, true);

        let messages = shared.take_pending();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "text-1");
        assert_eq!(messages[1].text, "text-3");
        assert!(messages[1].retain);

        // The swap leaves an empty buffer behind.
        assert!(shared.take_pending().is_empty());

        assert_eq!(shared.received_total.load(Ordering::Relaxed), 3);
        assert_eq!(shared.skipped_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn publish_drops_non_utf8_payload() {
        let shared = shared(&[], false);

        shared.on_publish("base/in/a", &[0xff, 0xfe], 1, 1, false);

        assert!(shared.take_pending().is_empty());
        assert_eq!(shared.received_total.load(Ordering::Relaxed), 1);
        assert_eq!(shared.skipped_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn publish_drops_message_id_zero_when_configured() {
        let shared = shared(&[], true);

        shared.on_publish("base/x", b"text-1", 0, 0, false);
        shared.on_publish("base/x", b"text-2", 4, 0, false);

        let messages = shared.take_pending();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, 4);
    }

    #[test]
    fn connack_transitions() {
        let shared = shared(&[], false);
        assert!(!shared.connected.load(Ordering::SeqCst));

        shared.on_connected();
        assert!(shared.connected.load(Ordering::SeqCst));

        shared.on_connect_rejected("BadUserNamePassword");
        assert!(!shared.connected.load(Ordering::SeqCst));
        assert!(shared.error_info().unwrap().contains("BadUserNamePassword"));
    }

    #[test]
    fn first_disconnect_reason_wins() {
        let shared = shared(&[], false);
        shared.on_connected();

        shared.on_disconnected(Some("keepalive timeout"));
        shared.on_disconnected(Some("second failure"));

        let info = shared.error_info().unwrap();
        assert!(info.contains("keepalive timeout"));
        assert!(!info.contains("second failure"));
    }

    #[test]
    fn suback_failure_is_recorded() {
        let shared = shared(&[], false);
        shared.on_connected();

        shared.on_suback(false, "[Failure]");
        assert!(!shared.subscribed.load(Ordering::SeqCst));
        assert!(shared.subscribe_failed.load(Ordering::SeqCst));

        shared.on_suback(true, "[Success(AtLeastOnce)]");
        assert!(shared.subscribed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn get_messages_fails_when_disconnected() {
        let settings = MqttSettings {
            client_id: None,
            host: "localhost".to_string(),
            port: Some(1883),
            keepalive: 60,
            protocol: 4,
            ssl_ca_certs: None,
            ssl_certfile: None,
            ssl_keyfile: None,
            ssl_insecure: false,
            user: None,
            password: None,
            filter_message_id_0: false,
            subscriptions: vec!["base/#".to_string()],
            skip_subscription_regexes: Vec::new(),
        };
        let listener = MqttListener::new(settings, Lifecycle::new()).unwrap();

        // Never connected: draining must fail loudly.
        assert!(matches!(
            listener.get_messages(),
            Err(MqttError::ConnectionLost(_))
        ));
    }
}
