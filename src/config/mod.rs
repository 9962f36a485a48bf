mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, Environment, File};

use crate::utils::Result;

pub use settings::{
    BrokerSettings, LoggingSettings, Settings, StorageSettings, default_data_dir,
};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
///
/// Environment keys use the `ORDERPUB_` prefix and `__` between sections,
/// e.g. `ORDERPUB_BROKER__URL` or `ORDERPUB_STORAGE__DATA_DIR`.
pub fn load_config() -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("ORDERPUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let broker = partial.broker;
    let storage = partial.storage;
    let logging = partial.logging;

    Settings {
        broker: BrokerSettings {
            url: broker
                .as_ref()
                .and_then(|b| b.url.clone())
                .unwrap_or(default.broker.url),
            username: broker
                .as_ref()
                .and_then(|b| b.username.clone())
                .or(default.broker.username),
            password: broker
                .as_ref()
                .and_then(|b| b.password.clone())
                .or(default.broker.password),
            send_timeout_ms: broker
                .as_ref()
                .and_then(|b| b.send_timeout_ms)
                .unwrap_or(default.broker.send_timeout_ms),
            reconnect_floor_ms: broker
                .as_ref()
                .and_then(|b| b.reconnect_floor_ms)
                .unwrap_or(default.broker.reconnect_floor_ms),
            reconnect_ceiling_ms: broker
                .as_ref()
                .and_then(|b| b.reconnect_ceiling_ms)
                .unwrap_or(default.broker.reconnect_ceiling_ms),
        },
        storage: StorageSettings {
            data_dir: storage
                .as_ref()
                .and_then(|s| s.data_dir.clone())
                .unwrap_or(default.storage.data_dir),
            snapshot_file: storage
                .as_ref()
                .and_then(|s| s.snapshot_file.clone())
                .unwrap_or(default.storage.snapshot_file),
            log_file: storage
                .as_ref()
                .and_then(|s| s.log_file.clone())
                .unwrap_or(default.storage.log_file),
            fsync: storage
                .as_ref()
                .and_then(|s| s.fsync)
                .unwrap_or(default.storage.fsync),
        },
        logging: LoggingSettings {
            level: logging
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.logging.level),
        },
    }
}
