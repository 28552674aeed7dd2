//! Codex CLI adapter.
//!
//! Batch runs go through `codex exec`; interactive runs start the TUI with
//! the prompt as its first message.

use crate::agent::{AgentAdapter, AgentName, CommandOptions};

/// Adapter for the Codex CLI.
pub struct CodexCliAdapter {
    program: String,
}

impl CodexCliAdapter {
    pub fn new(program: Option<String>) -> Self {
        Self {
            program: program.unwrap_or_else(|| "codex".to_string()),
        }
    }
}

impl AgentAdapter for CodexCliAdapter {
    fn name(&self) -> AgentName {
        AgentName::Codex
    }

    fn program(&self) -> &str {
        &self.program
    }

    fn command_args(&self, prompt: &str, options: CommandOptions) -> Vec<String> {
        let mut args = vec![self.program.clone()];
        if !options.interactive {
            args.push("exec".to_string());
        }
        if options.dangerously_allow_all_actions {
            args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        }
        args.push(prompt.to_string());
        args
    }
}
