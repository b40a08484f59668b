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

// src/store/db.rs
// The journal table access layer. MessageStore is the sole holder of
// the database connection; bulk inserts go through the COPY protocol.

use chrono::{DateTime, Local};
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection};
use tracing::{debug, error, info};

use crate::config::DatabaseSettings;
use crate::errors::DatabaseError;
use crate::lifecycle::{Lifecycle, StatusEvent};
use crate::message::Message;
use crate::store::encode;

// Interval between "overall stored" progress logs.
const STORED_LOG_INTERVAL_SECONDS: i64 = 300;

pub struct MessageStore {
    conn: Option<PgConnection>,
    copy_statement: String,
    delete_statement: String,
    clean_up_after_days: i32,
    lifecycle: Lifecycle,

    last_connect_time: Option<DateTime<Local>>,
    last_store_time: DateTime<Local>,
    last_clean_up_time: DateTime<Local>,

    stored_total: u64,
    last_stored_log: DateTime<Local>,

    settings: DatabaseSettings,
}

impl MessageStore {
    pub fn new(settings: DatabaseSettings, lifecycle: Lifecycle) -> Self {
        // The table name is validated to be a plain identifier at
        // config load; quoting keeps it inert in the statement text.
        let table = format!("\"{}\"", settings.table_name);
        let now = Local::now();

        Self {
            conn: None,
            copy_statement: format!(
                "COPY {table} (message_id, topic, text, qos, retain, time) FROM STDIN"
            ),
            delete_statement: format!(
                "DELETE FROM {table} WHERE time < NOW() - make_interval(days => $1)"
            ),
            clean_up_after_days: settings.clean_up_after_days,
            lifecycle,
            last_connect_time: None,
            last_store_time: now,
            last_clean_up_time: now,
            stored_total: 0,
            last_stored_log: now,
            settings,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn last_connect_time(&self) -> Option<DateTime<Local>> {
        self.last_connect_time
    }

    pub fn last_store_time(&self) -> DateTime<Local> {
        self.last_store_time
    }

    pub fn last_clean_up_time(&self) -> DateTime<Local> {
        self.last_clean_up_time
    }

    pub fn clean_up_after_days(&self) -> i32 {
        self.clean_up_after_days
    }

    pub async fn connect(&mut self) -> Result<(), DatabaseError> {
        if let Some(old) = self.conn.take() {
            let _ = old.close().await;
        }

        let conn = open_connection(&self.settings).await?;
        self.conn = Some(conn);
        self.last_connect_time = Some(Local::now());

        self.lifecycle.notify(StatusEvent::MessageStoreConnected);
        debug!("message store connected");
        Ok(())
    }

    // store bulk-inserts one batch within a single transaction; row
    // order inside the batch is preserved by COPY.
    pub async fn store(&mut self, messages: &[Message]) -> Result<(), DatabaseError> {
        if messages.is_empty() {
            return Ok(());
        }

        let conn = self.conn.as_mut().ok_or(DatabaseError::NotConnected)?;

        let mut tx = conn
            .begin()
            .await
            .map_err(|e| DatabaseError::query("transaction begin", e))?;

        let mut copy = tx
            .copy_in_raw(&self.copy_statement)
            .await
            .map_err(|e| DatabaseError::query(&self.copy_statement, e))?;
        copy.send(encode::copy_rows(messages).into_bytes())
            .await
            .map_err(|e| DatabaseError::query(&self.copy_statement, e))?;
        let rows = copy
            .finish()
            .await
            .map_err(|e| DatabaseError::query(&self.copy_statement, e))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::query("transaction commit", e))?;

        debug!("{rows} row(s) inserted");
        self.last_store_time = Local::now();
        self.stored_total += rows;

        self.lifecycle.notify(StatusEvent::MessageStoreStored);

        let now = Local::now();
        if (now - self.last_stored_log).num_seconds() > STORED_LOG_INTERVAL_SECONDS {
            self.last_stored_log = now;
            info!("overall messages stored: {}", self.stored_total);
        }

        Ok(())
    }

    // clean_up deletes rows older than the retention window. Callers
    // decide when to run it (and skip it when retention is disabled).
    pub async fn clean_up(&mut self) -> Result<(), DatabaseError> {
        let conn = self.conn.as_mut().ok_or(DatabaseError::NotConnected)?;

        let result = sqlx::query(&self.delete_statement)
            .bind(self.clean_up_after_days)
            .execute(&mut *conn)
            .await
            .map_err(|e| DatabaseError::query(&self.delete_statement, e))?;

        debug!("{} row(s) cleaned up", result.rows_affected());
        self.last_clean_up_time = Local::now();
        Ok(())
    }

    pub async fn close(&mut self) {
        let was_connected = self.conn.is_some();

        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                error!("closing database connection failed: {e}");
            }
        }

        if was_connected {
            self.lifecycle.notify(StatusEvent::MessageStoreClosed);
            debug!("message store closed");
        }
    }
}

// open_connection dials the configured database and pins the session
// time zone; shared by the message store and the schema bootstrap.
pub(crate) async fn open_connection(
    settings: &DatabaseSettings,
) -> Result<PgConnection, DatabaseError> {
    let mut options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .database(&settings.database);
    if let Some(user) = &settings.user {
        options = options.username(user);
    }
    if let Some(password) = &settings.password {
        options = options.password(password);
    }

    let mut conn = options.connect().await.map_err(DatabaseError::Connect)?;

    let statement = match &settings.timezone {
        Some(timezone) => format!("SET TIME ZONE '{timezone}'"),
        // No configured zone: pin the local UTC offset, which is what
        // the receipt timestamps carry anyway.
        None => format!(
            "SET TIME ZONE INTERVAL '{}' HOUR TO MINUTE",
            Local::now().format("%:z")
        ),
    };
    if let Err(e) = sqlx::query(&statement).execute(&mut conn).await {
        error!("setting timezone failed ({statement})!");
        return Err(DatabaseError::query(statement, e));
    }

    Ok(conn)
}
