//! Configuration management with YAML support

use anyhow::{Context, Result};
use directories::ProjectDirs;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::probe::SourceFormat;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Per-source settings keyed by source tag (`codex`, `claude`)
    #[serde(default = "default_sources")]
    pub sources: HashMap<String, SourceConfig>,

    #[serde(default)]
    pub rescan: RescanConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Individual source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub base_path: Option<String>,

    /// File-name globs to skip; `None` keeps the source's defaults
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescanConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

// Default value functions
fn default_database_path() -> String {
    ProjectDirs::from("", "", "histview")
        .map(|dirs| dirs.data_dir().join("index.sqlite").to_string_lossy().into_owned())
        .unwrap_or_else(|| "~/.local/share/histview/index.sqlite".to_string())
}

fn default_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    5
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_sources() -> HashMap<String, SourceConfig> {
    SourceFormat::ALL
        .iter()
        .map(|format| (format.as_str().to_string(), SourceConfig::default()))
        .collect()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_path: None,
            exclude: None,
        }
    }
}

impl Default for RescanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            sources: default_sources(),
            rescan: RescanConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./histview.yaml (current directory)
    /// 3. ~/.config/histview/histview.yaml
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut search_paths = vec![];
        if let Some(path) = path {
            let explicit = shellexpand::tilde(path).to_string();
            if !std::path::Path::new(&explicit).exists() {
                anyhow::bail!("config file not found: {explicit}");
            }
            search_paths.push(explicit);
        }
        search_paths.push("histview.yaml".to_string());
        search_paths.push(shellexpand::tilde("~/.config/histview/histview.yaml").to_string());

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)
                    .with_context(|| format!("Failed to read config {search_path}"))?;
                let config = Self::from_yaml(&content)
                    .with_context(|| format!("Failed to parse config {search_path}"))?;
                tracing::debug!(path = %search_path, "loaded configuration");
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }

    /// Sources absent from the map are enabled with defaults
    pub fn is_source_enabled(&self, format: SourceFormat) -> bool {
        self.sources
            .get(format.as_str())
            .map_or(true, |s| s.enabled)
    }

    /// Get the base path for a source, if configured
    pub fn source_path(&self, format: SourceFormat) -> Option<PathBuf> {
        self.sources
            .get(format.as_str())
            .and_then(|s| s.base_path.as_ref())
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }

    /// Compiled exclusion globs; invalid patterns are logged and skipped
    pub fn source_excludes(&self, format: SourceFormat) -> Option<Vec<Pattern>> {
        let patterns = self.sources.get(format.as_str())?.exclude.as_ref()?;
        Some(
            patterns
                .iter()
                .filter_map(|p| match Pattern::new(p) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        tracing::warn!(source = %format, pattern = %p, "ignoring invalid exclude glob: {e}");
                        None
                    }
                })
                .collect(),
        )
    }

    /// Never shorter than one second
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan.interval_secs.max(1))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.is_source_enabled(SourceFormat::Codex));
        assert!(config.is_source_enabled(SourceFormat::Claude));
        assert_eq!(config.rescan_interval(), Duration::from_secs(5));
        assert_eq!(config.bind_address(), "127.0.0.1:8787");
        assert!(config.database.path.ends_with("index.sqlite"));
        assert!(config.source_excludes(SourceFormat::Claude).is_none());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
database:
  path: ~/.local/share/histview/test.sqlite

sources:
  codex:
    enabled: false
  claude:
    base_path: /data/claude
    exclude: ["agent-*.jsonl", "scratch-*.jsonl"]

rescan:
  interval_secs: 0

server:
  port: 9000
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(!config.is_source_enabled(SourceFormat::Codex));
        assert!(config.is_source_enabled(SourceFormat::Claude));
        assert_eq!(
            config.source_path(SourceFormat::Claude),
            Some(PathBuf::from("/data/claude"))
        );
        assert_eq!(config.source_excludes(SourceFormat::Claude).unwrap().len(), 2);
        assert_eq!(config.rescan_interval(), Duration::from_secs(1));
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert!(!config.database_path().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_invalid_exclude_glob_is_skipped() {
        let yaml = r#"
sources:
  claude:
    exclude: ["[unclosed", "agent-*.jsonl"]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let excludes = config.source_excludes(SourceFormat::Claude).unwrap();
        assert_eq!(excludes.len(), 1);
        assert!(excludes[0].matches("agent-1.jsonl"));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        assert!(Config::load(Some("/nonexistent/histview.yaml")).is_err());
    }
}
