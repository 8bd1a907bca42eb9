use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables are read with this prefix, e.g. `AWGBOT_ENDPOINT`.
pub const ENV_PREFIX: &str = "AWGBOT_";

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    /// Public host clients connect to; written into every client config.
    pub endpoint: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_docker_container")]
    pub docker_container: String,

    #[serde(default = "default_wg_config_file")]
    pub wg_config_file: String,

    #[serde(default = "default_clients_table")]
    pub clients_table: String,

    #[serde(default = "default_wg_binary")]
    pub wg_binary: String,

    #[serde(default = "default_client_dns")]
    pub client_dns: String,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    #[serde(default)]
    pub admin_chat_id: Option<String>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    endpoint: Option<String>,
    data_dir: Option<String>,
    log_dir: Option<String>,
    docker_container: Option<String>,
    wg_config_file: Option<String>,
    clients_table: Option<String>,
    wg_binary: Option<String>,
    client_dns: Option<String>,
    command_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    telegram_bot_token: Option<String>,
    admin_chat_id: Option<String>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_docker_container() -> String {
    "amnezia-awg".to_string()
}

fn default_wg_config_file() -> String {
    "/opt/amnezia/awg/wg0.conf".to_string()
}

fn default_clients_table() -> String {
    "/opt/amnezia/awg/clientsTable".to_string()
}

fn default_wg_binary() -> String {
    "wg".to_string()
}

fn default_client_dns() -> String {
    "1.1.1.1, 1.0.0.1".to_string()
}

fn default_command_timeout_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = match config_path {
            Some(path_str) if Path::new(path_str).exists() => {
                let path = Path::new(path_str);
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            }
            _ => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::prefixed(ENV_PREFIX)
            .from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        Self::merge(env_config, file_config)
    }

    // Environment overrides file; defaults fill the rest.
    fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Result<Self, String> {
        let config = ServerConfig {
            endpoint: env
                .endpoint
                .or(file.endpoint)
                .ok_or_else(|| format!("{ENV_PREFIX}ENDPOINT is required"))?,
            data_dir: env.data_dir.or(file.data_dir).unwrap_or_else(default_data_dir),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            docker_container: env
                .docker_container
                .or(file.docker_container)
                .unwrap_or_else(default_docker_container),
            wg_config_file: env
                .wg_config_file
                .or(file.wg_config_file)
                .unwrap_or_else(default_wg_config_file),
            clients_table: env
                .clients_table
                .or(file.clients_table)
                .unwrap_or_else(default_clients_table),
            wg_binary: env.wg_binary.or(file.wg_binary).unwrap_or_else(default_wg_binary),
            client_dns: env.client_dns.or(file.client_dns).unwrap_or_else(default_client_dns),
            command_timeout_secs: env
                .command_timeout_secs
                .or(file.command_timeout_secs)
                .unwrap_or_else(default_command_timeout_secs),
            sweep_interval_secs: env
                .sweep_interval_secs
                .or(file.sweep_interval_secs)
                .unwrap_or_else(default_sweep_interval_secs),
            telegram_bot_token: env.telegram_bot_token.or(file.telegram_bot_token),
            admin_chat_id: env.admin_chat_id.or(file.admin_chat_id),
        };

        if config.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be greater than zero".to_string());
        }
        Ok(config)
    }

    /// Interface name, taken from the config file stem (`wg0.conf` -> `wg0`).
    pub fn interface_name(&self) -> String {
        Path::new(&self.wg_config_file)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("wg0")
            .to_string()
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
