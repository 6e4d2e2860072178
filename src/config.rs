// config.rs - Bot configuration from botconfig.txt with environment overrides
// The file uses KEY=VALUE lines, '#' comments and may carry a UTF-8 BOM.
// The first file found in CONFIG_PATHS wins; environment variables then
// override whatever the file set.

use log::{debug, warn};
use serenity::model::id::UserId;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const CONFIG_PATHS: [&str; 4] = [
    "botconfig.txt",
    "../botconfig.txt",
    "../../botconfig.txt",
    "src/botconfig.txt",
];

pub const CONFIG_KEYS: [&str; 5] = [
    "DISCORD_TOKEN",
    "PREFIX",
    "DATA_DIR",
    "DEVELOPER_ID",
    "PERMISSION_POLICY",
];

pub const DEFAULT_PREFIX: &str = "!";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_DEVELOPER_ID: u64 = 97771062690865152;
const TOKEN_PLACEHOLDER: &str = "YOUR_BOT_TOKEN_HERE";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DISCORD_TOKEN not found in botconfig.txt or the environment")]
    MissingToken,

    #[error("DISCORD_TOKEN is set to the placeholder value")]
    PlaceholderToken,

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// How a member's missing command permissions are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionPolicy {
    /// Only a missing `developer` permission stops the command
    #[default]
    Legacy,
    /// Any missing permission stops the command
    Strict,
}

impl FromStr for PermissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Ok(PermissionPolicy::Legacy),
            "strict" => Ok(PermissionPolicy::Strict),
            other => Err(format!("Unknown permission policy: {}", other)),
        }
    }
}

/// Settings the per-guild dispatcher needs
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub default_prefix: String,
    /// The identity allowed to use the override token and `developer` commands
    pub developer_id: UserId,
    pub permission_policy: PermissionPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_prefix: DEFAULT_PREFIX.to_string(),
            developer_id: UserId(DEFAULT_DEVELOPER_ID),
            permission_policy: PermissionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    pub data_dir: PathBuf,
    pub dispatch: DispatchConfig,
}

/// Parses KEY=VALUE lines, skipping blanks and comments
pub fn parse_config(content: &str) -> HashMap<String, String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut config = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            config.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    config
}

/// Reads the first botconfig.txt found, if any
fn read_config_file() -> Option<(String, HashMap<String, String>)> {
    for path in &CONFIG_PATHS {
        match fs::read_to_string(path) {
            Ok(content) => return Some((path.to_string(), parse_config(&content))),
            Err(_) => continue,
        }
    }
    None
}

impl BotConfig {
    /// Builds a config from already merged key/value pairs
    pub fn from_values(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let token = match values.get("DISCORD_TOKEN") {
            Some(token) if token == TOKEN_PLACEHOLDER => return Err(ConfigError::PlaceholderToken),
            Some(token) if !token.is_empty() => token.clone(),
            _ => return Err(ConfigError::MissingToken),
        };

        let default_prefix = values
            .get("PREFIX")
            .filter(|p| !p.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        let data_dir = values
            .get("DATA_DIR")
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let developer_id = match values.get("DEVELOPER_ID") {
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "DEVELOPER_ID",
                value: raw.clone(),
            })?,
            None => DEFAULT_DEVELOPER_ID,
        };

        let permission_policy = match values.get("PERMISSION_POLICY") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PERMISSION_POLICY",
                value: raw.clone(),
            })?,
            None => PermissionPolicy::default(),
        };

        Ok(Self {
            token,
            data_dir,
            dispatch: DispatchConfig {
                default_prefix,
                developer_id: UserId(developer_id),
                permission_policy,
            },
        })
    }

    /// Loads botconfig.txt (optional) and applies environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut values = match read_config_file() {
            Some((path, values)) => {
                println!("✅ Configuration loaded from {}", path);
                values
            }
            None => {
                warn!("⚠️ No botconfig.txt found in any expected location (., .., ../.., src/)");
                HashMap::new()
            }
        };

        for key in CONFIG_KEYS {
            if let Ok(value) = env::var(key) {
                debug!("🔧 {} overridden from environment", key);
                values.insert(key.to_string(), value);
            }
        }

        Self::from_values(&values)
    }
}
