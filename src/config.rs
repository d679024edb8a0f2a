use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::model::Theme;

pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOADING_TICK_MS: u64 = 120;
pub const DEFAULT_SCROLLBACK: usize = 1_000;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PodtermConfig {
    pub source: Option<String>,
    pub server: Option<String>,
    pub cluster: Option<String>,
    pub token: Option<String>,
    pub theme: Option<Theme>,
    pub shells: Vec<String>,
    pub default_shell: Option<String>,
    /// Zero disables the handshake deadline.
    pub handshake_timeout_secs: u64,
    pub loading_tick_ms: u64,
    pub scrollback: usize,
}

impl Default for PodtermConfig {
    fn default() -> Self {
        Self {
            source: None,
            server: None,
            cluster: None,
            token: None,
            theme: None,
            shells: Vec::new(),
            default_shell: None,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            loading_tick_ms: DEFAULT_LOADING_TICK_MS,
            scrollback: DEFAULT_SCROLLBACK,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PodtermConfigFile {
    #[serde(default, alias = "url", alias = "dashboard")]
    server: Option<String>,
    #[serde(default, alias = "cluster_id")]
    cluster: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    theme: Option<String>,
    #[serde(default)]
    shells: Vec<String>,
    #[serde(default, alias = "shell")]
    default_shell: Option<String>,
    #[serde(default, alias = "handshake_timeout")]
    handshake_timeout_secs: Option<u64>,
    #[serde(default)]
    loading_tick_ms: Option<u64>,
    #[serde(default)]
    scrollback: Option<usize>,
}

impl ConfigWatcher {
    pub fn discover() -> Self {
        Self {
            path: discover_config_path(),
            modified: None,
        }
    }

    #[cfg(test)]
    fn at(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            modified: None,
        }
    }

    pub fn load_current(&mut self) -> Result<PodtermConfig> {
        let Some(path) = self.path.clone() else {
            return Ok(PodtermConfig::default());
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let parsed: PodtermConfigFile = if raw.trim().is_empty() {
            PodtermConfigFile::default()
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        };
        self.modified = fs::metadata(&path)
            .ok()
            .and_then(|meta| meta.modified().ok());

        let theme = match parsed.theme.as_deref() {
            Some(token) => Some(Theme::from_token(token).with_context(|| {
                format!("unknown theme '{token}' in {}", path.display())
            })?),
            None => None,
        };

        Ok(PodtermConfig {
            source: Some(path.display().to_string()),
            server: non_empty(parsed.server),
            cluster: non_empty(parsed.cluster),
            token: non_empty(parsed.token),
            theme,
            shells: parsed
                .shells
                .into_iter()
                .filter(|shell| !shell.trim().is_empty())
                .collect(),
            default_shell: non_empty(parsed.default_shell),
            handshake_timeout_secs: parsed
                .handshake_timeout_secs
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            loading_tick_ms: parsed.loading_tick_ms.unwrap_or(DEFAULT_LOADING_TICK_MS),
            scrollback: parsed.scrollback.unwrap_or(DEFAULT_SCROLLBACK),
        })
    }

    pub fn reload_if_changed(&mut self) -> Result<Option<PodtermConfig>> {
        let Some(current_path) = self.path.clone() else {
            self.path = discover_config_path();
            if self.path.is_some() {
                return self.load_current().map(Some);
            }
            return Ok(None);
        };

        if !current_path.exists() {
            self.path = discover_config_path();
            self.modified = None;
            if self.path.is_some() {
                return self.load_current().map(Some);
            }
            return Ok(Some(PodtermConfig::default()));
        }

        let modified = fs::metadata(&current_path)
            .ok()
            .and_then(|meta| meta.modified().ok());
        if modified != self.modified {
            return self.load_current().map(Some);
        }

        Ok(None)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PODTERM_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("podterm.yaml"),
        PathBuf::from("podterm.yml"),
        PathBuf::from(".podterm.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/podterm/config.yaml"),
            PathBuf::from(&home).join(".config/podterm/config.yml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
