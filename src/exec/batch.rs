//! Batch runner: the agent shares the harness's standard streams.

use std::process::{Command, ExitStatus, Stdio};

use tracing::info;

use super::{ExecError, ExecutionRequest, ExecutionResult, Runner};

/// Runs the agent as a plain child process and waits for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchRunner;

impl Runner for BatchRunner {
    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        let (program, args) = request.argv.split_first().ok_or(ExecError::EmptyArgv)?;

        info!(
            program = %program,
            work_dir = %request.working_dir.display(),
            "spawning agent"
        );

        let status = Command::new(program)
            .args(args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| ExecError::Launch {
                program: program.clone(),
                source,
            })?;

        let result = result_from_status(program, status)?;
        info!(exit_code = result.exit_code, "agent process exited");
        Ok(result)
    }
}

fn result_from_status(program: &str, status: ExitStatus) -> Result<ExecutionResult, ExecError> {
    if let Some(exit_code) = status.code() {
        return Ok(ExecutionResult { exit_code });
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ExecError::Signaled {
                program: program.to_string(),
                signal,
            });
        }
    }

    Err(ExecError::Signaled {
        program: program.to_string(),
        signal: -1,
    })
}
