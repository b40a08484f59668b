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

// src/lib.rs
// Main exports for the MQTT-to-Postgres journal service.

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod listener;
pub mod logging;
pub mod message;
pub mod runner;
pub mod schema;
pub mod scripts;
pub mod store;

// Export some things for convenience.
pub use config::AppConfig;
pub use errors::{ConfigError, DatabaseError, MqttError, ServiceError};
pub use lifecycle::{Lifecycle, StatusEvent, StatusObserver};
pub use listener::MqttListener;
pub use message::Message;
pub use runner::Runner;
pub use schema::SchemaCreator;
pub use store::BatchWriter;

// run_service drives the full pipeline until the lifecycle says stop,
// then shuts the stages down in order (listener first, writer last).
pub async fn run_service(config: &AppConfig, lifecycle: Lifecycle) -> Result<(), ServiceError> {
    let mut runner = Runner::new(config, lifecycle).await?;
    let result = runner.run().await;
    runner.close().await;
    result
}
