//! Claude Code adapter.
//!
//! Batch runs use print mode (`-p`) so the agent exits after one turn;
//! interactive runs drop `-p` and keep the TUI. File edits are always
//! pre-approved so the agent can write its result log.

use crate::agent::{AgentAdapter, AgentName, CommandOptions};

/// Adapter for Claude Code CLI.
pub struct ClaudeCodeAdapter {
    /// Override the claude binary name/path (default: "claude").
    program: String,
}

impl ClaudeCodeAdapter {
    pub fn new(program: Option<String>) -> Self {
        Self {
            program: program.unwrap_or_else(|| "claude".to_string()),
        }
    }
}

impl AgentAdapter for ClaudeCodeAdapter {
    fn name(&self) -> AgentName {
        AgentName::Claude
    }

    fn program(&self) -> &str {
        &self.program
    }

    fn command_args(&self, prompt: &str, options: CommandOptions) -> Vec<String> {
        let mut args = vec![self.program.clone()];
        if !options.interactive {
            args.push("-p".to_string());
        }
        args.push("--permission-mode".to_string());
        args.push("acceptEdits".to_string());
        if options.dangerously_allow_all_actions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args.push(prompt.to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(interactive: bool, dangerous: bool) -> Vec<String> {
        ClaudeCodeAdapter::new(None).command_args(
            "p",
            CommandOptions {
                interactive,
                dangerously_allow_all_actions: dangerous,
            },
        )
    }

    #[test]
    fn default_program_is_claude() {
        let adapter = ClaudeCodeAdapter::new(None);
        assert_eq!(adapter.program(), "claude");
        assert_eq!(adapter.name(), AgentName::Claude);
    }

    #[test]
    fn custom_program_path() {
        let adapter = ClaudeCodeAdapter::new(Some("/usr/local/bin/claude".to_string()));
        let args = adapter.command_args("p", CommandOptions::default());
        assert_eq!(args[0], "/usr/local/bin/claude");
    }

    #[test]
    fn batch_uses_print_mode() {
        assert_eq!(
            argv(false, false),
            ["claude", "-p", "--permission-mode", "acceptEdits", "p"]
        );
        assert_eq!(
            argv(false, true),
            [
                "claude",
                "-p",
                "--permission-mode",
                "acceptEdits",
                "--dangerously-skip-permissions",
                "p"
            ]
        );
    }

    #[test]
    fn interactive_drops_print_mode() {
        assert_eq!(
            argv(true, false),
            ["claude", "--permission-mode", "acceptEdits", "p"]
        );
        assert_eq!(
            argv(true, true),
            [
                "claude",
                "--permission-mode",
                "acceptEdits",
                "--dangerously-skip-permissions",
                "p"
            ]
        );
    }
}
