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

// src/errors.rs
// Error types for error handling throughout the service.

use std::path::PathBuf;

use thiserror::Error;

// ConfigError covers everything that can go wrong before the service
// starts: an unreadable file, bad permissions, YAML that does not parse
// or values that do not validate. All of these are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),
    // Permissions protects credentials: anything but 0600 is rejected.
    #[error(
        "wrong config file permissions ({path}: expected 600, got {mode:o})! \
         change via 'chmod'. this config file may contain sensitive information."
    )]
    Permissions { path: PathBuf, mode: u32 },
    #[error("config file parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// MqttError covers broker communication failures. Connect/subscribe
// errors surface to the caller of connect(); a runtime disconnect is
// recorded in the listener and raised by the next get_messages().
#[derive(Error, Debug)]
pub enum MqttError {
    // Client occurs when the v4 client rejects a request (e.g. the
    // request channel to the event loop is gone).
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    // ClientV5 is the same condition for the v5 client.
    #[error("MQTT client error: {0}")]
    ClientV5(#[from] rumqttc::v5::ClientError),
    // ConnectionLost occurs when the broker connection dropped or was
    // never usable; the text carries the recorded reason when known.
    #[error("MQTT connection error: {0}")]
    ConnectionLost(String),
    // SubscribeFailed occurs when the broker answers SUBSCRIBE with a
    // failure reason code.
    #[error("could not subscribe to MQTT topics: {0}")]
    SubscribeFailed(String),
    // SubscribeTimeout occurs when no successful SUBACK arrives within
    // the bounded subscribe-wait.
    #[error("couldn't subscribe to MQTT topics... no connection?! {0}")]
    SubscribeTimeout(String),
    // Tls occurs when the configured TLS material cannot be loaded.
    #[error("MQTT TLS configuration error: {0}")]
    Tls(String),
    // Pattern occurs when a skip regex does not compile.
    #[error("invalid skip pattern: {0}")]
    Pattern(String),
    // AlreadyStarted occurs when connect() is called twice.
    #[error("connect() has already been called on the listener")]
    AlreadyStarted,
}

// DatabaseError wraps driver failures together with the statement that
// produced them; the driver message is self-contained, so the writer
// loop logs these as a single line.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("database connection failed: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("database error: {source} query={query}")]
    Query {
        query: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("database is not connected")]
    NotConnected,
}

impl DatabaseError {
    pub fn query(query: impl Into<String>, source: sqlx::Error) -> Self {
        DatabaseError::Query {
            query: query.into(),
            source,
        }
    }
}

// ServiceError is what run_service and the schema bootstrap bubble up
// to main, which logs it and exits non-zero.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mqtt(#[from] MqttError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    // WriterStopped occurs when the runner notices the writer task is
    // gone; continuing would buffer messages nobody persists.
    #[error("journal writer task stopped unexpectedly")]
    WriterStopped,
    #[error("failed to install signal handlers: {0}")]
    Signals(std::io::Error),
}
