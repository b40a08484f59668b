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

// src/main.rs
// Command-line front-end: config loading, logging setup, signal
// handling and the choice between the schema bootstrap and the
// long-running service.

use std::path::PathBuf;

use clap::Parser;
use mqtt_pg_logger::{AppConfig, Lifecycle, SchemaCreator, ServiceError, run_service};
use mqtt_pg_logger::{lifecycle, logging};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "mqtt-pg-logger")]
#[command(about = "Logs MQTT messages to a Postgres database.", long_about = None)]
struct Cli {
    // Config file
    #[arg(long, default_value = "/etc/mqtt-pg-logger.yaml")]
    config_file: PathBuf,

    // Create database table (if not exists) and create or replace a trigger
    #[arg(long)]
    create: bool,

    // Log file (overrides the configured one)
    #[arg(long)]
    log_file: Option<PathBuf>,

    // Log level
    #[arg(long, value_parser = ["debug", "info", "warning", "error"])]
    log_level: Option<String>,

    // Print log output to console too
    #[arg(long)]
    print_logs: bool,

    // Systemd/journald integration: skip timestamp + prints to console
    #[arg(long)]
    systemd_mode: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        // Logging may not be up yet when the config is broken, so the
        // failure goes to stderr as well.
        eprintln!("{e}");
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ServiceError> {
    let config = AppConfig::load(&cli.config_file)?;

    let mut logging_settings = config.logging.clone();
    if cli.log_file.is_some() {
        logging_settings.log_file = cli.log_file.clone();
    }
    if cli.log_level.is_some() {
        logging_settings.log_level = cli.log_level.clone();
    }
    if cli.print_logs {
        logging_settings.print_logs = true;
    }
    if cli.systemd_mode {
        logging_settings.systemd_mode = true;
    }
    let _guard = logging::init(&logging_settings)?;

    debug!("start");

    let result = if cli.create {
        let mut creator = SchemaCreator::new(config.database.clone());
        let created = async {
            creator.connect().await?;
            creator.create_schema().await
        }
        .await;
        creator.close().await;
        created
    } else {
        let lifecycle = Lifecycle::new();
        lifecycle::install_signal_handlers(&lifecycle).map_err(ServiceError::Signals)?;
        run_service(&config, lifecycle).await
    };

    info!("shutdown");
    result
}
