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

// src/message.rs
// The in-memory representation of a received MQTT message on its way
// into the journal table.

use chrono::{DateTime, Local};

// Message is created once by the listener callback and then moved by
// value through the pipeline until a batch commit consumes it. The
// `data` column of the journal is filled by a database trigger and has
// no counterpart here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    // Broker-assigned packet id. MQTT v3 reserves 0 as an invalid id.
    pub message_id: i32,
    pub topic: String,
    // Payload bytes decoded as UTF-8.
    pub text: String,
    pub qos: i16,
    pub retain: bool,
    // Stamped with the local zone at receipt.
    pub time: DateTime<Local>,
}
