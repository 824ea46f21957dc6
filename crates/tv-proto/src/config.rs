use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

/// Where the channel list comes from and how its names are cleaned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// An http(s):// URL or a local file path.
    #[serde(default = "default_source")]
    pub source: String,
    /// Upper bound for the single catalog request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Code points that mark special channel categories at the end of a name.
    #[serde(default = "default_decorations")]
    pub decorations: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Passed to mpv verbatim, after the built-in arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default)]
    pub start_fullscreen: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            timeout_secs: default_timeout_secs(),
            decorations: default_decorations(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            extra_args: Vec::new(),
        }
    }
}

pub const DEFAULT_CATALOG_URL: &str =
    "https://raw.githubusercontent.com/Free-TV/IPTV/refs/heads/master/lists/finland.md";

fn default_source() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_decorations() -> String {
    "Ⓖ@".to_string()
}

fn default_volume() -> f32 {
    0.5
}

impl Config {
    /// Load from `path`, writing defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.catalog.source, DEFAULT_CATALOG_URL);
        assert_eq!(config.catalog.timeout_secs, 10);
        assert!(config.catalog.decorations.contains('Ⓖ'));
        assert!(config.catalog.decorations.contains('@'));
        assert!(!config.ui.start_fullscreen);
        assert!(Config::config_path().ends_with("tvplay/config.toml"));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [catalog]
            source = "/srv/channels.md"
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog.source, "/srv/channels.md");
        assert_eq!(config.catalog.timeout_secs, 10);
        assert_eq!(config.mpv.default_volume, 0.5);
        assert!(config.mpv.extra_args.is_empty());
    }

    #[test]
    fn load_from_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.catalog.timeout_secs, 10);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.catalog.source, config.catalog.source);
    }
}
