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

// src/schema.rs
// One-shot schema bootstrap (--create): journal table, JSON extraction
// function and its trigger. The running service never performs DDL.

use sqlx::{Connection, PgConnection};
use tracing::{error, info};

use crate::config::{DEFAULT_TABLE_NAME, DatabaseSettings};
use crate::errors::{ConfigError, DatabaseError, ServiceError};
use crate::scripts;
use crate::store::open_connection;

const TABLE_SQL: &str = include_str!("../sql/table.sql");
const CONVERT_SQL: &str = include_str!("../sql/convert.sql");
const TRIGGER_SQL: &str = include_str!("../sql/trigger.sql");

pub struct SchemaCreator {
    conn: Option<PgConnection>,
    settings: DatabaseSettings,
}

impl SchemaCreator {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            conn: None,
            settings,
        }
    }

    pub async fn connect(&mut self) -> Result<(), DatabaseError> {
        self.conn = Some(open_connection(&self.settings).await?);
        Ok(())
    }

    pub async fn create_schema(&mut self) -> Result<(), ServiceError> {
        // The shipped scripts hard-code the default table name; a
        // custom name needs manually adapted scripts instead.
        if self.settings.table_name != DEFAULT_TABLE_NAME {
            return Err(ConfigError::Invalid(format!(
                "cannot create the database schema for an individual table name ({}); \
                 use the default name ({DEFAULT_TABLE_NAME}) or adapt and execute the \
                 SQL scripts manually",
                self.settings.table_name
            ))
            .into());
        }

        // Statements run one by one outside a transaction; a repeated
        // run fails on the existing table, which is the signal that
        // the schema is already in place.
        self.execute_statements(&scripts::split_statements(TABLE_SQL))
            .await?;
        info!("table and indices created");

        // The function and trigger bodies carry inner semicolons, so
        // they are executed whole.
        self.execute_statements(&[CONVERT_SQL.to_string()]).await?;
        info!("json convert function created");

        self.execute_statements(&[TRIGGER_SQL.to_string()]).await?;
        info!("json convert trigger created");

        Ok(())
    }

    async fn execute_statements(&mut self, statements: &[String]) -> Result<(), DatabaseError> {
        let conn = self.conn.as_mut().ok_or(DatabaseError::NotConnected)?;

        for statement in statements {
            if let Err(e) = sqlx::query(statement).execute(&mut *conn).await {
                error!("db-command failed: {e}\n{statement}");
                return Err(DatabaseError::query(statement, e));
            }
        }
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.close().await;
        }
    }
}
