use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker link, the on-disk queue and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the outbound broker connection.
///
/// Delays and timeouts are in milliseconds.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub send_timeout_ms: u64,
    pub reconnect_floor_ms: u64,
    pub reconnect_ceiling_ms: u64,
}

/// Where the delivery queue is persisted.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub snapshot_file: String,
    pub log_file: String,
    /// `sync_data` after every log append.
    pub fsync: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub storage: Option<PartialStorageSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub send_timeout_ms: Option<u64>,
    pub reconnect_floor_ms: Option<u64>,
    pub reconnect_ceiling_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStorageSettings {
    pub data_dir: Option<PathBuf>,
    pub snapshot_file: Option<String>,
    pub log_file: Option<String>,
    pub fsync: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl StorageSettings {
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file)
    }
}

/// Picks `<cwd>/order-management-system/data` when the service is launched
/// from the repository root, `<cwd>/data` otherwise.
pub fn default_data_dir() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let nested = cwd.join("order-management-system");
    let base = if nested.is_dir() { nested } else { cwd };
    base.join("data")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                url: "ws://127.0.0.1:8080".to_string(),
                username: None,
                password: None,
                send_timeout_ms: 5000,
                reconnect_floor_ms: 1000,
                reconnect_ceiling_ms: 30000,
            },
            storage: StorageSettings {
                data_dir: default_data_dir(),
                snapshot_file: "queue.json".to_string(),
                log_file: "queue.log".to_string(),
                fsync: true,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
