//! Client configuration at `~/.shellmux/config.toml`.
//!
//! Names the page the shell is served from, the configuration endpoint, and
//! terminal defaults. CLI flags always override config file values.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use shellmux_client::SurfaceConfig;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub terminal: TerminalConfig,
}

/// Where the shell host lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the page hosting the terminal; the fallback socket
    /// endpoint is derived from it.
    #[serde(default = "default_page_url")]
    pub page_url: String,

    /// Configuration endpoint. Empty means `<page_url>/api/config`.
    #[serde(default)]
    pub config_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            page_url: default_page_url(),
            config_url: String::new(),
        }
    }
}

fn default_page_url() -> String {
    "http://localhost:4009".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_font_size")]
    pub font_size: u16,

    /// Scrollback depth in lines.
    #[serde(default = "default_scrollback")]
    pub scrollback: u32,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            font_size: default_font_size(),
            scrollback: default_scrollback(),
        }
    }
}

fn default_font_size() -> u16 {
    14
}

fn default_scrollback() -> u32 {
    10_000
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub page_url: Option<String>,
    pub config_url: Option<String>,
    pub font_size: Option<u16>,
}

/// Effective settings after applying overrides.
#[derive(Debug, Clone)]
pub struct Settings {
    pub page_url: String,
    pub config_url: String,
    pub surface: SurfaceConfig,
}

impl Config {
    /// Default location, `~/.shellmux/config.toml`.
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".shellmux").join("config.toml")
    }

    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Merge command-line overrides into the file values.
    pub fn settings(&self, overrides: Overrides) -> Settings {
        let page_url = overrides
            .page_url
            .unwrap_or_else(|| self.server.page_url.clone());
        let config_url = overrides
            .config_url
            .or_else(|| Some(self.server.config_url.clone()).filter(|u| !u.is_empty()))
            .unwrap_or_else(|| format!("{}/api/config", page_url.trim_end_matches('/')));

        let surface = SurfaceConfig {
            font_size: overrides.font_size.unwrap_or(self.terminal.font_size),
            scrollback: self.terminal.scrollback,
            ..SurfaceConfig::default()
        };

        Settings {
            page_url,
            config_url,
            surface,
        }
    }
}
