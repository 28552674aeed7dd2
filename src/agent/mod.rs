//! Agent adapter layer.
//!
//! Each supported coding agent (Claude Code, Codex CLI) is wrapped in an
//! adapter that knows how to turn a prompt into the argument vector that
//! launches the agent, in either batch or interactive mode. Agent selection
//! (`auto`, `claude`, `codex`) is resolved against an injected PATH lookup so
//! the rules can be tested without touching the real environment.

pub mod claude;
pub mod codex;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Agent selection requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentMode {
    #[default]
    Auto,
    Claude,
    Codex,
}

/// A concrete agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentName {
    Claude,
    Codex,
}

impl AgentName {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentName::Claude => "claude",
            AgentName::Codex => "codex",
        }
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid agent mode {0:?} (expected auto, claude, or codex)")]
    InvalidMode(String),
    #[error("agent {0:?} was not found on PATH")]
    NotFound(String),
    #[error("agent {0} has an empty program")]
    EmptyProgram(AgentName),
}

impl FromStr for AgentMode {
    type Err = AgentError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "auto" => Ok(AgentMode::Auto),
            "claude" => Ok(AgentMode::Claude),
            "codex" => Ok(AgentMode::Codex),
            _ => Err(AgentError::InvalidMode(raw.to_string())),
        }
    }
}

/// Flags that change how an agent is launched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOptions {
    pub interactive: bool,
    pub dangerously_allow_all_actions: bool,
}

/// Builds the command line for one agent CLI.
pub trait AgentAdapter: Send + Sync {
    fn name(&self) -> AgentName;

    /// Program the argument vector starts with.
    fn program(&self) -> &str;

    /// Full argument vector (program first) that runs `prompt`.
    fn command_args(&self, prompt: &str, options: CommandOptions) -> Vec<String>;
}

/// Per-agent program overrides, usually from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentPrograms {
    pub claude: Option<String>,
    pub codex: Option<String>,
}

impl AgentPrograms {
    fn program_for(&self, name: AgentName) -> &str {
        let configured = match name {
            AgentName::Claude => self.claude.as_deref(),
            AgentName::Codex => self.codex.as_deref(),
        };
        configured.unwrap_or(name.as_str())
    }
}

/// An agent that was found and the program that launches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAgent {
    pub name: AgentName,
    pub program: String,
}

impl ResolvedAgent {
    /// Agent using its default program name.
    pub fn new(name: AgentName) -> Self {
        Self {
            name,
            program: name.as_str().to_string(),
        }
    }

    pub fn adapter(&self) -> Box<dyn AgentAdapter> {
        let program = Some(self.program.clone());
        match self.name {
            AgentName::Claude => Box::new(claude::ClaudeCodeAdapter::new(program)),
            AgentName::Codex => Box::new(codex::CodexCliAdapter::new(program)),
        }
    }
}

/// Locates an executable, returning its path when present.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<PathBuf>;

/// Pick the agent for `mode`, checking that its program can be found.
///
/// `Auto` prefers Claude and falls back to Codex.
pub fn resolve(
    mode: AgentMode,
    programs: &AgentPrograms,
    lookup: Lookup<'_>,
) -> Result<ResolvedAgent, AgentError> {
    let find = |name: AgentName| {
        let program = programs.program_for(name);
        lookup(program).map(|_| ResolvedAgent {
            name,
            program: program.to_string(),
        })
    };

    match mode {
        AgentMode::Auto => find(AgentName::Claude)
            .or_else(|| find(AgentName::Codex))
            .ok_or_else(|| AgentError::NotFound(programs.program_for(AgentName::Claude).into())),
        AgentMode::Claude => find(AgentName::Claude)
            .ok_or_else(|| AgentError::NotFound(programs.program_for(AgentName::Claude).into())),
        AgentMode::Codex => find(AgentName::Codex)
            .ok_or_else(|| AgentError::NotFound(programs.program_for(AgentName::Codex).into())),
    }
}

/// Build the argument vector that runs `prompt` with `agent`.
pub fn command_args(
    agent: &ResolvedAgent,
    prompt: &str,
    options: CommandOptions,
) -> Result<Vec<String>, AgentError> {
    if agent.program.trim().is_empty() {
        return Err(AgentError::EmptyProgram(agent.name));
    }
    Ok(agent.adapter().command_args(prompt, options))
}

/// Search `PATH` for `program`. Paths containing a separator are checked
/// directly.
pub fn lookup_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
