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

// src/config.rs
// Typed YAML configuration with validation. The config file carries
// credentials, so it is rejected unless its mode is exactly 0600.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ConfigError;

pub const DEFAULT_TABLE_NAME: &str = "journal";

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_WAIT_MAX_SECONDS: u64 = 10;
const DEFAULT_CLEAN_UP_AFTER_DAYS: i32 = 14;
const DEFAULT_KEEPALIVE: u64 = 60;
const DEFAULT_PROTOCOL: u8 = 4;
const DEFAULT_LOG_MAX_BYTES: u64 = 1_048_576;
const DEFAULT_LOG_MAX_COUNT: usize = 5;
const MIN_LOG_MAX_BYTES: u64 = 102_400;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    // Session time zone; when unset the local zone offset is used.
    pub timezone: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_wait_max_seconds")]
    pub wait_max_seconds: u64,
    // Entries older than this many days are deleted; <= 0 disables
    // the cleanup entirely.
    #[serde(default = "default_clean_up_after_days")]
    pub clean_up_after_days: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttSettings {
    pub client_id: Option<String>,
    pub host: String,
    // When unset, 1883 (plain) or 8883 (TLS) applies.
    pub port: Option<u16>,
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
    // 3 == MQTT 3.1, 4 == MQTT 3.1.1, 5 == MQTT 5.
    #[serde(default = "default_protocol")]
    pub protocol: u8,
    pub ssl_ca_certs: Option<PathBuf>,
    pub ssl_certfile: Option<PathBuf>,
    pub ssl_keyfile: Option<PathBuf>,
    #[serde(default)]
    pub ssl_insecure: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    // MQTT v3 reserves message id 0 as invalid; when set, such
    // messages are dropped before buffering.
    #[serde(default)]
    pub filter_message_id_0: bool,
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub skip_subscription_regexes: Vec<String>,
}

impl MqttSettings {
    pub fn uses_tls(&self) -> bool {
        self.ssl_ca_certs.is_some() || self.ssl_certfile.is_some() || self.ssl_keyfile.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    pub log_file: Option<PathBuf>,
    pub log_level: Option<String>,
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_log_max_count")]
    pub max_count: usize,
    #[serde(default)]
    pub print_logs: bool,
    #[serde(default)]
    pub systemd_mode: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_file: None,
            log_level: None,
            max_bytes: DEFAULT_LOG_MAX_BYTES,
            max_count: DEFAULT_LOG_MAX_COUNT,
            print_logs: false,
            systemd_mode: false,
        }
    }
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_wait_max_seconds() -> u64 {
    DEFAULT_WAIT_MAX_SECONDS
}

fn default_clean_up_after_days() -> i32 {
    DEFAULT_CLEAN_UP_AFTER_DAYS
}

fn default_keepalive() -> u64 {
    DEFAULT_KEEPALIVE
}

fn default_protocol() -> u8 {
    DEFAULT_PROTOCOL
}

fn default_log_max_bytes() -> u64 {
    DEFAULT_LOG_MAX_BYTES
}

fn default_log_max_count() -> usize {
    DEFAULT_LOG_MAX_COUNT
}

impl AppConfig {
    // load reads, parses and validates the config file, enforcing the
    // 0600 permission contract first.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        check_file_access(path)?;

        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.mqtt.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl DatabaseSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("database.host must not be empty".into()));
        }
        if self.database.is_empty() {
            return Err(ConfigError::Invalid(
                "database.database must not be empty".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "database.batch_size must be at least 1".into(),
            ));
        }
        if !is_plain_identifier(&self.table_name) {
            return Err(ConfigError::Invalid(format!(
                "database.table_name ({}) is not a plain SQL identifier",
                self.table_name
            )));
        }
        if let Some(timezone) = &self.timezone {
            let valid = !timezone.is_empty()
                && timezone
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "/_+-:".contains(c));
            if !valid {
                return Err(ConfigError::Invalid(format!(
                    "database.timezone ({timezone}) contains unexpected characters"
                )));
            }
        }
        Ok(())
    }
}

impl MqttSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("mqtt.host must not be empty".into()));
        }
        if !matches!(self.protocol, 3 | 4 | 5) {
            return Err(ConfigError::Invalid(format!(
                "mqtt.protocol must be 3, 4 or 5 (got {})",
                self.protocol
            )));
        }
        if self.keepalive == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.keepalive must be at least 1 second".into(),
            ));
        }
        if self.subscriptions.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::Invalid(
                "mqtt.subscriptions must not contain empty topics".into(),
            ));
        }
        for pattern in &self.skip_subscription_regexes {
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("mqtt.skip_subscription_regexes ({pattern}): {e}"))
            })?;
        }
        Ok(())
    }
}

impl LoggingSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(level) = &self.log_level {
            if !matches!(level.as_str(), "debug" | "info" | "warning" | "error") {
                return Err(ConfigError::Invalid(format!(
                    "logging.log_level must be one of debug|info|warning|error (got {level})"
                )));
            }
        }
        if self.max_bytes < MIN_LOG_MAX_BYTES {
            return Err(ConfigError::Invalid(format!(
                "logging.max_bytes must be at least {MIN_LOG_MAX_BYTES}"
            )));
        }
        if self.max_count == 0 {
            return Err(ConfigError::Invalid(
                "logging.max_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_file_access(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o600 {
        return Err(ConfigError::Permissions {
            path: path.to_path_buf(),
            mode,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    const MINIMAL_YAML: &str = "\
database:
  host: localhost
  port: 5432
  database: journal_db
mqtt:
  host: localhost
  port: 1883
  subscriptions:
    - \"base/#\"
";

    fn write_config(yaml: &str, mode: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        fs::set_permissions(file.path(), fs::Permissions::from_mode(mode)).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_config(MINIMAL_YAML, 0o600);
        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.database.table_name, "journal");
        assert_eq!(config.database.batch_size, 100);
        assert_eq!(config.database.wait_max_seconds, 10);
        assert_eq!(config.database.clean_up_after_days, 14);
        assert_eq!(config.mqtt.keepalive, 60);
        assert_eq!(config.mqtt.protocol, 4);
        assert!(!config.mqtt.filter_message_id_0);
        assert!(config.mqtt.skip_subscription_regexes.is_empty());
        assert_eq!(config.logging.max_bytes, 1_048_576);
        assert_eq!(config.logging.max_count, 5);
    }

    #[test]
    fn rejects_open_permissions() {
        let file = write_config(MINIMAL_YAML, 0o644);
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Permissions { mode: 0o644, .. }));
    }

    #[test]
    fn rejects_unknown_keys() {
        let yaml = format!("{MINIMAL_YAML}unexpected: true\n");
        let file = write_config(&yaml, 0o600);
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_bad_protocol() {
        let yaml = MINIMAL_YAML.replace("  port: 1883\n", "  port: 1883\n  protocol: 6\n");
        let file = write_config(&yaml, 0o600);
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_bad_skip_regex() {
        let yaml = format!("{MINIMAL_YAML}  skip_subscription_regexes:\n    - \"base/(\"\n");
        let file = write_config(&yaml, 0o600);
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_quoted_table_name() {
        let yaml = MINIMAL_YAML.replace(
            "  database: journal_db\n",
            "  database: journal_db\n  table_name: \"journal; drop table x\"\n",
        );
        let file = write_config(&yaml, 0o600);
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_undersized_log_rotation() {
        let yaml = format!("{MINIMAL_YAML}logging:\n  max_bytes: 1024\n");
        let file = write_config(&yaml, 0o600);
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn tls_detection_considers_any_material() {
        let yaml = MINIMAL_YAML.replace(
            "  port: 1883\n",
            "  port: 8883\n  ssl_ca_certs: /etc/ssl/ca.pem\n",
        );
        let file = write_config(&yaml, 0o600);
        let config = AppConfig::load(file.path()).unwrap();
        assert!(config.mqtt.uses_tls());
    }
}
