//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Shell configuration. File: ~/.config/parley/config.toml or
/// /etc/parley/config.toml. Env overrides: PARLEY_NAME, PARLEY_PORT,
/// PARLEY_DOWNLOAD_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Display name attached to outgoing chat.
    #[serde(default = "default_name")]
    pub name: String,
    /// Port to host on, and the default port when joining (default 9999).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Where verified received files are saved.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "guest".to_string())
}

fn default_port() -> u16 {
    parley_core::DEFAULT_PORT
}

fn default_download_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("Downloads"),
        None => PathBuf::from("."),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            download_dir: default_download_dir(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("PARLEY_NAME") {
        if !s.is_empty() {
            c.name = s;
        }
    }
    if let Ok(s) = std::env::var("PARLEY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Ok(s) = std::env::var("PARLEY_DOWNLOAD_DIR") {
        if !s.is_empty() {
            c.download_dir = PathBuf::from(s);
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/parley/config.toml"));
    }
    out.push(PathBuf::from("/etc/parley/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
