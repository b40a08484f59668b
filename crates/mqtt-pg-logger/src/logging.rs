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

// src/logging.rs
// Tracing setup: optional rolling log file, optional console output,
// journald-friendly mode without timestamps.

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::errors::ConfigError;

// init wires the subscriber stack. The returned guard must stay alive
// for the process lifetime, or buffered file output is lost.
pub fn init(settings: &LoggingSettings) -> Result<Option<WorkerGuard>, ConfigError> {
    let level = parse_log_level(settings.log_level.as_deref());
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guard = None;

    if let Some(log_file) = &settings.log_file {
        let directory = log_file.parent().unwrap_or_else(|| std::path::Path::new("."));
        std::fs::create_dir_all(directory)?;
        let file_name = log_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mqtt-pg-logger.log".to_string());

        // Rotation is daily; max_count caps the files kept around.
        // The max_bytes setting is validated for sanity but the file
        // writer does not rotate by size.
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(file_name)
            .max_log_files(settings.max_count)
            .build(directory)
            .map_err(|e| ConfigError::Invalid(format!("logging.log_file: {e}")))?;
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        guard = Some(worker_guard);

        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed(),
        );
    }

    if settings.print_logs || settings.systemd_mode {
        if settings.systemd_mode {
            // journald stamps every line itself.
            layers.push(tracing_subscriber::fmt::layer().without_time().boxed());
        } else {
            layers.push(tracing_subscriber::fmt::layer().boxed());
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

fn parse_log_level(value: Option<&str>) -> LevelFilter {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("debug") => LevelFilter::DEBUG,
        Some("info") => LevelFilter::INFO,
        Some("warning") => LevelFilter::WARN,
        Some("error") => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_log_level(Some("debug")), LevelFilter::DEBUG);
        assert_eq!(parse_log_level(Some("Warning")), LevelFilter::WARN);
        assert_eq!(parse_log_level(Some("ERROR")), LevelFilter::ERROR);
    }

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(parse_log_level(None), LevelFilter::INFO);
        assert_eq!(parse_log_level(Some("verbose")), LevelFilter::INFO);
    }
}
