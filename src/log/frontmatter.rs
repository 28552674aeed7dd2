//! Status extraction from an agent-written result log.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use thiserror::Error;

const DELIMITER: &str = "---";

/// Verdict the agent recorded in the result log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pass,
    Fail,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "pass",
            Status::Fail => "fail",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("read log {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing front matter")]
    Empty,
    #[error("front matter must start at byte 0 with ---")]
    NoOpeningDelimiter,
    #[error("missing closing front matter delimiter")]
    NoClosingDelimiter,
    #[error("parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("missing status key")]
    MissingStatus,
    #[error("invalid status value {0:?}")]
    InvalidStatus(String),
}

/// Read `path` and return the `status` recorded in its front matter.
pub fn parse_status(path: &Path) -> Result<Status, StatusError> {
    let content = std::fs::read_to_string(path).map_err(|source| StatusError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    status_from_str(&content)
}

/// Parse the status out of result-log content.
pub fn status_from_str(content: &str) -> Result<Status, StatusError> {
    let mut lines = content.lines().map(|line| line.trim_end_matches('\r'));

    match lines.next() {
        None => return Err(StatusError::Empty),
        Some(DELIMITER) => {}
        Some(_) => return Err(StatusError::NoOpeningDelimiter),
    }

    let mut yaml_lines = Vec::new();
    let mut closed = false;
    for line in lines {
        if line == DELIMITER {
            closed = true;
            break;
        }
        yaml_lines.push(line);
    }
    if !closed {
        return Err(StatusError::NoClosingDelimiter);
    }

    let yaml = yaml_lines.join("\n");
    let parsed: Value = if yaml.trim().is_empty() {
        Value::Null
    } else {
        serde_yaml::from_str(&yaml)?
    };

    let raw = parsed.get("status").ok_or(StatusError::MissingStatus)?;
    let normalized = scalar_text(raw).trim().to_lowercase();
    match normalized.as_str() {
        "pass" => Ok(Status::Pass),
        "fail" => Ok(Status::Fail),
        _ => Err(StatusError::InvalidStatus(normalized)),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}
