use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::agent::AgentPrograms;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".mdtest";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct Defaults {
    /// `auto`, `claude` or `codex`. Validated when the run starts.
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub dangerously_allow_all_actions: bool,
}

fn default_agent() -> String {
    "auto".to_string()
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            agent: default_agent(),
            interactive: false,
            dangerously_allow_all_actions: false,
        }
    }
}

/// Program override for one agent CLI.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct AgentProgram {
    #[serde(default)]
    pub program: Option<String>,
}

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
pub struct AgentsConfig {
    #[serde(default)]
    pub claude: AgentProgram,
    #[serde(default)]
    pub codex: AgentProgram,
}

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
pub struct ProjectConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub agents: AgentsConfig,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.mdtest/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let config: ProjectConfig =
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    /// Program overrides for agent resolution.
    pub fn programs(&self) -> AgentPrograms {
        AgentPrograms {
            claude: non_empty(&self.agents.claude.program),
            codex: non_empty(&self.agents.codex.program),
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

fn non_empty(program: &Option<String>) -> Option<String> {
    program
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}
