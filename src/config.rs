//! Configuration management
//!
//! Backend selection, progression rules, point defaults and leaderboard
//! settings, stored as `config.toml` in the platform config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::learning::EmptyPredecessorPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Which backend to talk to
    #[serde(default)]
    pub backend: BackendConfig,
    /// Unlock rules
    #[serde(default)]
    pub progression: ProgressionConfig,
    /// Point awards
    #[serde(default)]
    pub points: PointsConfig,
    /// Leaderboard display
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
    /// Realtime score updates
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Rest,
    #[default]
    Local,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rest" => Ok(BackendKind::Rest),
            "local" => Ok(BackendKind::Local),
            other => Err(format!("unknown backend '{}', expected 'rest' or 'local'", other)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Rest => write!(f, "rest"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Base url of the hosted backend
    #[serde(default)]
    pub url: Option<String>,
    /// Public (anon) key sent with every hosted request
    #[serde(default)]
    pub anon_key: Option<String>,
    /// SQLite file for the local backend; defaults to the data directory
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { kind: BackendKind::Local, url: None, anon_key: None, database_path: None }
    }
}

impl BackendConfig {
    /// Apply `QUESTLINE_BACKEND_URL` / `QUESTLINE_ANON_KEY`
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("QUESTLINE_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.url = Some(url);
                self.kind = BackendKind::Rest;
            }
        }
        if let Ok(key) = std::env::var("QUESTLINE_ANON_KEY") {
            if !key.trim().is_empty() {
                self.anon_key = Some(key);
            }
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("questline.db")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressionConfig {
    /// Whether a category after an empty one is open
    #[serde(default)]
    pub empty_predecessor: EmptyPredecessorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsConfig {
    /// Points for a block that does not set its own
    #[serde(default = "default_block_points")]
    pub default_block_points: u32,
}

fn default_block_points() -> u32 {
    10
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self { default_block_points: default_block_points() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    #[serde(default = "default_leaderboard_limit")]
    pub limit: usize,
}

fn default_leaderboard_limit() -> usize {
    10
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self { limit: default_leaderboard_limit() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_secs() -> u64 {
    25
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self { enabled: default_true(), heartbeat_secs: default_heartbeat_secs() }
    }
}

impl Config {
    /// Load configuration from file, creating it on first run
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        config.backend.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot use
    pub fn validate(&self) -> Result<()> {
        if self.realtime.enabled && self.realtime.heartbeat_secs == 0 {
            anyhow::bail!("realtime.heartbeat_secs must be at least 1");
        }
        if self.leaderboard.limit == 0 {
            anyhow::bail!("leaderboard.limit must be at least 1");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent().context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "questline", "questline").context("Failed to get project directories")
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config() -> Result<()> {
    let config = Config::load()?;

    println!("Configuration ({})", config_path()?.display());
    println!();
    println!("  backend:            {}", config.backend.kind);
    match config.backend.kind {
        BackendKind::Rest => {
            println!("  url:                {}", config.backend.url.as_deref().unwrap_or("(not set)"));
            println!(
                "  anon key:           {}",
                if config.backend.anon_key.is_some() { "configured" } else { "(not set)" }
            );
        }
        BackendKind::Local => {
            println!("  database:           {}", config.backend.database_path()?.display());
        }
    }
    println!("  empty predecessor:  {:?}", config.progression.empty_predecessor);
    println!("  default points:     {}", config.points.default_block_points);
    println!("  leaderboard size:   {}", config.leaderboard.limit);
    println!(
        "  realtime:           {} (heartbeat {}s)",
        if config.realtime.enabled { "enabled" } else { "disabled" },
        config.realtime.heartbeat_secs
    );

    Ok(())
}

/// Switch backend kind
pub fn set_backend(kind: BackendKind, url: Option<String>, anon_key: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    config.backend.kind = kind;
    if url.is_some() {
        config.backend.url = url;
    }
    if anon_key.is_some() {
        config.backend.anon_key = anon_key;
    }
    if kind == BackendKind::Rest && config.backend.url.is_none() {
        anyhow::bail!("The rest backend needs a url (--url or QUESTLINE_BACKEND_URL)");
    }
    config.save()?;
    println!("Backend set to {}", kind);
    Ok(())
}

/// Reset configuration to defaults
pub fn reset_config() -> Result<()> {
    let config = Config::default();
    config.save()?;
    println!("Configuration reset to defaults.");
    Ok(())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [backend]
            kind = "rest"
            url = "https://demo.example.co"

            [progression]
            empty_predecessor = "closed"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.kind, BackendKind::Rest);
        assert_eq!(config.progression.empty_predecessor, EmptyPredecessorPolicy::Closed);
        assert_eq!(config.points.default_block_points, 10);
        assert_eq!(config.leaderboard.limit, 10);
        assert!(config.realtime.enabled);
    }

    #[test]
    fn test_default_toml_round_trips() {
        let parsed: Config = toml::from_str(&default_config_toml()).unwrap();
        assert_eq!(parsed.backend.kind, BackendKind::Local);
        assert_eq!(parsed.realtime.heartbeat_secs, 25);
    }

    #[test]
    fn test_zero_heartbeat_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [realtime]
            heartbeat_secs = 0
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_secs"));

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("REST".parse::<BackendKind>().unwrap(), BackendKind::Rest);
        assert!("firebase".parse::<BackendKind>().is_err());
    }
}
