//! Subprocess invocation for the external tools the installer drives
//! (apt-get, dpkg-query, ogr2ogr, kubectl).
//!
//! Two shapes: `run_streamed` lets the tool's stdout reach the terminal
//! (package installs, long imports) while stderr is captured for error
//! reporting; `run_captured` collects stdout for the caller. Both surface
//! non-zero exits as [`CartobaseError::ToolFailed`] carrying the exit status
//! and the first 500 chars of stderr.

use crate::error::{CartobaseError, Result};
use std::process::{Command, Stdio};
use tracing::debug;

const STDERR_HINT_LIMIT: usize = 500;

fn spawn_error(tool: &str, e: std::io::Error) -> CartobaseError {
    CartobaseError::ToolSpawn {
        tool: tool.to_string(),
        detail: e.to_string(),
    }
}

fn failure(tool: &str, status: std::process::ExitStatus, stderr: &[u8]) -> CartobaseError {
    CartobaseError::ToolFailed {
        tool: tool.to_string(),
        status: status.code().unwrap_or(-1),
        detail: String::from_utf8_lossy(stderr)
            .chars()
            .take(STDERR_HINT_LIMIT)
            .collect(),
    }
}

/// Run to completion with stdout flowing to the terminal.
pub fn run_streamed(tool: &str, cmd: &mut Command) -> Result<()> {
    debug!(tool, "spawning");
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|e| spawn_error(tool, e))?;
    let output = child.wait_with_output().map_err(|e| spawn_error(tool, e))?;
    if !output.status.success() {
        return Err(failure(tool, output.status, &output.stderr));
    }
    Ok(())
}

/// Run to completion and return stdout.
pub fn run_captured(tool: &str, cmd: &mut Command) -> Result<String> {
    debug!(tool, "spawning");
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|e| spawn_error(tool, e))?;
    let output = child.wait_with_output().map_err(|e| spawn_error(tool, e))?;
    if !output.status.success() {
        return Err(failure(tool, output.status, &output.stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_returns_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello"]);
        let out = run_captured("sh", &mut cmd).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_carries_status_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let err = run_captured("sh", &mut cmd).unwrap_err();
        match err {
            CartobaseError::ToolFailed {
                tool,
                status,
                detail,
            } => {
                assert_eq!(tool, "sh");
                assert_eq!(status, 3);
                assert!(detail.contains("oops"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let mut cmd = Command::new("definitely-not-a-real-binary-cartobase");
        let err = run_captured("definitely-not-a-real-binary-cartobase", &mut cmd).unwrap_err();
        assert!(matches!(err, CartobaseError::ToolSpawn { .. }));
    }

    #[test]
    fn streamed_succeeds_quietly() {
        let mut cmd = Command::new("true");
        run_streamed("true", &mut cmd).unwrap();
    }
}
