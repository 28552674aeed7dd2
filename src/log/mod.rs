//! Result logs written by the agent.
//!
//! Every test execution gets a fresh markdown log next to the test file. The
//! agent is told to start that log with YAML front matter carrying
//! `status: pass|fail`; this module allocates the log path and reads the
//! verdict back.

pub mod frontmatter;
pub mod paths;

pub use frontmatter::{Status, StatusError, parse_status};
pub use paths::{LocationError, ResultLocation, TEST_SUFFIX, allocate};
