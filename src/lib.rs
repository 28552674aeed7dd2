//! Run markdown tests (`*.test.md`) through a coding agent.
//!
//! Each test file is handed to an external agent CLI together with the path
//! of a fresh result log. The agent writes its verdict as YAML front matter
//! (`status: pass|fail`) at the top of that log, and the suite reads it back.

pub mod agent;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod exec;
pub mod log;
pub mod prompt;
pub mod suite;
#[cfg(unix)]
pub mod supervisor;
