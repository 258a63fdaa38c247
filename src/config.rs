use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::notify::MAX_MULTICAST_TOKENS;

#[derive(Parser, Debug)]
#[command(name = "dropspot", about = "Location-anchored drops event server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub decision: DecisionConfig,
    pub moderation: ModerationConfig,
    pub notify: NotifyConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Drops farther than this are not considered for a geofence
    pub max_radius_meters: f64,
    /// Wait before the single retry when no location fix is available
    pub location_retry_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DecisionConfig {
    pub persist_timeout_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ModerationConfig {
    /// Only uploads under this storage prefix are moderated
    pub path_prefix: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_radius_meters: 300.0,
            location_retry_ms: 2000,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            persist_timeout_ms: 5000,
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            path_prefix: "drops/".to_string(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_MULTICAST_TOKENS,
        }
    }
}

impl SyncConfig {
    pub fn location_retry(&self) -> Duration {
        Duration::from_millis(self.location_retry_ms)
    }
}

impl DecisionConfig {
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("dropspot.db"));
        }

        config.notify.batch_size = config.notify.batch_size.clamp(1, MAX_MULTICAST_TOKENS);

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".dropspot")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("dropspot.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(data_dir: Option<PathBuf>) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.sync.max_radius_meters, 300.0);
        assert_eq!(config.sync.location_retry(), Duration::from_secs(2));
        assert_eq!(config.decision.persist_timeout(), Duration::from_secs(5));
        assert_eq!(config.moderation.path_prefix, "drops/");
        assert_eq!(config.notify.batch_size, 500);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli(Some(PathBuf::from("/tmp/test-dropspot")));
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-dropspot"));
    }

    #[test]
    fn data_dir_defaults_to_home_dot_dropspot() {
        assert!(Config::data_dir(&cli(None)).ends_with(".dropspot"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli(Some(tmp.path().to_path_buf()))).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.db_path(), tmp.path().join("dropspot.db"));
    }

    #[test]
    fn load_reads_toml_file_and_clamps_batch_size() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
port = 9000

[sync]
max_radius_meters = 150.0

[moderation]
path_prefix = "uploads/drops/"

[notify]
batch_size = 5000
"#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(config_path),
            host: None,
            port: None,
            data_dir: Some(tmp.path().to_path_buf()),
        };
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.sync.max_radius_meters, 150.0);
        assert_eq!(config.sync.location_retry_ms, 2000);
        assert_eq!(config.moderation.path_prefix, "uploads/drops/");
        assert_eq!(config.notify.batch_size, 500);
    }

    #[test]
    fn cli_overrides_beat_toml_values() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "192.168.1.1"
port = 9000
"#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(config_path),
            host: Some("10.0.0.1".to_string()),
            port: Some(4000),
            data_dir: Some(tmp.path().to_path_buf()),
        };
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 4000);
    }
}
