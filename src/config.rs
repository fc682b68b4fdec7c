use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

pub const DEFAULT_MIN_SCRIPT_UID: u32 = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub controls: Vec<Control>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    pub name: Option<String>,
    pub software: Option<String>,
    pub error_pages: Option<HashMap<u16, String>>,
}

/// Routing context a script request was resolved against.
#[derive(Debug, Deserialize, Clone)]
pub struct Control {
    pub path: String,
    pub root: Option<String>,
    pub script_user: Option<String>,
    #[serde(default)]
    pub run_scripts_as_owner: bool,
    #[serde(default = "default_min_script_uid")]
    pub min_script_uid: u32,
    #[serde(default)]
    pub dns: bool,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub putenvs: Vec<String>,
}

fn default_min_script_uid() -> u32 {
    DEFAULT_MIN_SCRIPT_UID
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        if config.controls.is_empty() {
            return Err(ConfigError::NoControls);
        }
        Ok(config)
    }

    pub fn find_control(&self, path: &str) -> Option<&Control> {
        // Longest prefix match
        self.controls
            .iter()
            .filter(|c| path.starts_with(&c.path))
            .max_by_key(|c| c.path.len())
    }
}

impl ServerConfig {
    pub fn software(&self) -> &str {
        self.software.as_deref().unwrap_or(crate::SERVER_SOFTWARE)
    }
}

impl Control {
    /// A control with no identity policy and no exports, rooted at `root`.
    pub fn new(path: &str, root: Option<&str>) -> Self {
        Control {
            path: path.to_string(),
            root: root.map(str::to_string),
            script_user: None,
            run_scripts_as_owner: false,
            min_script_uid: DEFAULT_MIN_SCRIPT_UID,
            dns: false,
            exports: Vec::new(),
            putenvs: Vec::new(),
        }
    }

    pub fn wants_identity_change(&self) -> bool {
        self.script_user.is_some() || self.run_scripts_as_owner
    }
}
