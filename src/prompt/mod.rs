//! Instruction text handed to the agent for a single test.

use std::path::Path;

/// Render the instruction that tells the agent which test to execute and
/// where to write its result log.
pub fn render(test_abs: &Path, log_abs: &Path) -> String {
    format!(
        "Execute the test file step by step.\n\
         Read the test from this exact absolute path: {}\n\
         Write the output log to this exact absolute path: {}\n\
         The output must begin with YAML front matter containing status: pass|fail.\n",
        test_abs.display(),
        log_abs.display(),
    )
}
