use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::NusError;
use crate::fetch::DEFAULT_BASE_URL;
use crate::titledb::DEFAULT_TITLE_DB_URL;

pub const CONFIG_FILE_NAME: &str = "nus-sync.json";
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub title_db_url: Option<String>,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub ticket_dir: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub source: Option<PathBuf>,
    pub base_url: String,
    pub title_db_url: String,
    pub download_dir: Utf8PathBuf,
    pub ticket_dir: Utf8PathBuf,
    pub workers: usize,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path (must exist), then `./nus-sync.json`, then the user config dir, then defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, NusError> {
        if let Some(path) = path {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(NusError::MissingConfig(path));
            }
            return Self::load(path);
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load(local);
        }

        if let Some(user) = user_config_path() {
            if user.exists() {
                return Self::load(user);
            }
        }

        Ok(Self::resolve_config(Config::default(), None))
    }

    fn load(path: PathBuf) -> Result<ResolvedConfig, NusError> {
        let content = fs::read_to_string(&path).map_err(|_| NusError::ConfigRead(path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| NusError::ConfigParse(err.to_string()))?;
        Ok(Self::resolve_config(config, Some(path)))
    }

    pub fn resolve_config(config: Config, source: Option<PathBuf>) -> ResolvedConfig {
        ResolvedConfig {
            source,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            title_db_url: config
                .title_db_url
                .unwrap_or_else(|| DEFAULT_TITLE_DB_URL.to_string()),
            download_dir: config
                .download_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from("downloads")),
            ticket_dir: config
                .ticket_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from("ticket")),
            workers: config.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs.unwrap_or(15)),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(1800)),
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "nus-sync").map(|dirs| dirs.config_dir().join("config.json"))
}
