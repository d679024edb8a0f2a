use serde::Deserialize;
use std::fmt::{Debug, Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "dark" | "d" | "night" => Some(Self::Dark),
            "light" | "l" | "day" => Some(Self::Light),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub ready: bool,
    pub state: String,
    pub restarts: u32,
    pub age: String,
}

impl ContainerInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: "-".to_string(),
            state: "Unknown".to_string(),
            age: "-".to_string(),
            ..Self::default()
        }
    }
}

/// A pod as seen by the shell client: identity plus its declared containers,
/// in declaration order.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct WorkloadRef {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
    pub containers: Vec<ContainerInfo>,
}

impl WorkloadRef {
    pub fn declares(&self, container: &str) -> bool {
        self.containers.iter().any(|info| info.name == container)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Bearer credential for the shell endpoint. Never printed.
#[derive(Clone, Eq, PartialEq, Default)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "Credential(<empty>)")
        } else {
            write!(f, "Credential(***)")
        }
    }
}

/// Everything needed to open one shell session. Built fresh for every
/// connection attempt.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionTarget {
    pub cluster: String,
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub shell: String,
    pub credential: Credential,
}

impl Display for SessionTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}:{} ({})",
            self.cluster, self.namespace, self.pod, self.container, self.shell
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

pub fn normalize_shell_token(token: &str) -> String {
    match token.trim() {
        "sh" => "/bin/sh".to_string(),
        "bash" => "/bin/bash".to_string(),
        "ash" => "/bin/ash".to_string(),
        "zsh" => "/bin/zsh".to_string(),
        other => other.to_string(),
    }
}
