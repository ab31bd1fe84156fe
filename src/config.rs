//! Config Store.
//!
//! An immutable snapshot built once at startup: compiled-in defaults,
//! overridden by the TOML config file under `config_path`, overridden by
//! environment variables under the `DLORC_` prefix. Never reloaded; callers
//! that need a changed value restart the process.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub workers: WorkerConfig,
    pub defaults: DefaultsConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// `download_path`: root for all downloaded files; the path-traversal boundary.
    pub download_path: PathBuf,
    /// `temp_path`: scratch directory for in-progress downloads.
    pub temp_path: PathBuf,
    /// `config_path`: location of the persistence store and archive files.
    pub config_path: PathBuf,
    /// Executable invoked by the Download Driver for each item.
    pub downloader_tool_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// `max_workers`: global worker-pool size.
    pub max_workers: usize,
    /// `max_workers_per_extractor`: default per-extractor quota.
    pub max_workers_per_extractor: usize,
    /// `max_workers_for_<EXTR>`: per-extractor override, case-insensitive key.
    #[serde(default)]
    pub max_workers_for_extractor: HashMap<String, usize>,
    /// Upper bound the composition root waits for in-flight items on shutdown.
    pub shutdown_grace_period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    pub default_preset: String,
    pub output_template: String,
    pub extract_info_timeout_secs: u64,
    pub playlist_items_concurrency: usize,
    pub remove_files: bool,
    pub prevent_live_premiere: bool,
    pub temp_keep: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// `tasks_handler_timer`: cron spec for the global task-dispatch tick.
    pub tasks_handler_timer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { username: None, password: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub buffer_depth: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { buffer_depth: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 2048, default_ttl_secs: 21_600 }
    }
}

impl WorkerConfig {
    /// Resolve the effective quota for an extractor name (case-insensitive).
    pub fn quota_for(&self, extractor: &str) -> usize {
        let key = extractor.to_ascii_lowercase();
        self.max_workers_for_extractor
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == key)
            .map(|(_, v)| *v)
            .unwrap_or(self.max_workers_per_extractor)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { host: "0.0.0.0".to_string(), port: 8787 },
            paths: PathsConfig {
                download_path: PathBuf::from("./appData/downloads"),
                temp_path: PathBuf::from("./appData/temp"),
                config_path: PathBuf::from("./appData/config"),
                downloader_tool_path: "yt-dlp".to_string(),
            },
            workers: WorkerConfig {
                max_workers: 4,
                max_workers_per_extractor: 2,
                max_workers_for_extractor: HashMap::new(),
                shutdown_grace_period_secs: 30,
            },
            defaults: DefaultsConfig {
                default_preset: "default".to_string(),
                output_template: "%(title)s.%(ext)s".to_string(),
                extract_info_timeout_secs: 60,
                playlist_items_concurrency: 2,
                remove_files: true,
                prevent_live_premiere: false,
                temp_keep: false,
            },
            scheduler: SchedulerConfig { tasks_handler_timer: "*/1 * * * *".to_string() },
            auth: AuthConfig::default(),
            events: EventsConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Priority: `DLORC_APPDATA_DIR` env var, else `./appData`.
pub fn get_appdata_dir() -> PathBuf {
    env::var("DLORC_APPDATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./appData"))
}

pub fn get_config_file_path() -> PathBuf {
    get_appdata_dir().join("config/config.toml")
}

pub fn get_db_path(config_path: &std::path::Path) -> PathBuf {
    config_path.join("store.db")
}

/// Creates the standard appData layout if missing. A permission failure
/// here is a startup-abort condition (exit code 2).
pub fn ensure_appdata_dirs() -> std::io::Result<()> {
    let appdata_dir = get_appdata_dir();
    std::fs::create_dir_all(appdata_dir.join("config"))?;
    std::fs::create_dir_all(appdata_dir.join("data"))?;
    std::fs::create_dir_all(appdata_dir.join("downloads"))?;
    std::fs::create_dir_all(appdata_dir.join("temp"))?;
    Ok(())
}

pub fn save_config(config: &Config, path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_string)?;
    tracing::info!(?path, "configuration saved");
    Ok(())
}

/// Loads the layered configuration: defaults < file < environment.
pub fn load(config_file: &std::path::Path) -> Result<Config, figment::Error> {
    figment::Figment::new()
        .merge(figment::providers::Serialized::defaults(Config::default()))
        .merge(figment::providers::Toml::file(config_file))
        .merge(figment::providers::Env::prefixed("DLORC_").split("__"))
        .extract()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_for_falls_back_to_default_when_no_override() {
        let w = Config::default().workers;
        assert_eq!(w.quota_for("youtube"), w.max_workers_per_extractor);
    }

    #[test]
    fn quota_for_is_case_insensitive() {
        let mut w = Config::default().workers;
        w.max_workers_for_extractor.insert("YouTube".to_string(), 1);
        assert_eq!(w.quota_for("youtube"), 1);
        assert_eq!(w.quota_for("YOUTUBE"), 1);
    }

    #[test]
    fn env_overrides_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "[server]\nhost = \"127.0.0.1\"\nport = 9000\n").unwrap();
        std::env::set_var("DLORC_SERVER__PORT", "9999");
        let cfg = load(&file).expect("config loads");
        std::env::remove_var("DLORC_SERVER__PORT");
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 9999);
    }
}
