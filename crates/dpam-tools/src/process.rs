// crates/dpam-tools/src/process.rs

//! Child-process plumbing shared by every adapter.

use std::process::{Command, Output};
use thiserror::Error;
use tracing::debug;

/// External tool invocation failure.
///
/// Carries enough to reproduce the call: tool name, full argv, the exit
/// code (absent when the process died to a signal or never launched), and
/// the tail of stderr.
#[derive(Debug, Error)]
#[error("{tool} failed (exit {exit_code:?}): {stderr_tail}")]
pub struct ToolFailure {
    pub tool: String,
    pub argv: Vec<String>,
    pub exit_code: Option<i32>,
    pub stderr_tail: String,
}

const STDERR_TAIL_BYTES: usize = 2048;

/// Run a command to completion, capturing output.
///
/// # Errors
/// Returns a [`ToolFailure`] if the process cannot be launched or exits
/// non-zero.
pub fn run_tool(tool: &str, command: &mut Command) -> Result<Output, ToolFailure> {
    let argv = describe(command);
    debug!(tool, argv = argv.join(" "), "invoking");
    let output = command.output().map_err(|err| ToolFailure {
        tool: tool.to_owned(),
        argv: argv.clone(),
        exit_code: None,
        stderr_tail: format!("failed to launch: {err}"),
    })?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(ToolFailure {
            tool: tool.to_owned(),
            argv,
            exit_code: output.status.code(),
            stderr_tail: stderr_tail(&output.stderr),
        })
    }
}

fn describe(command: &Command) -> Vec<String> {
    std::iter::once(command.get_program().to_string_lossy().into_owned())
        .chain(
            command
                .get_args()
                .map(|arg| arg.to_string_lossy().into_owned()),
        )
        .collect()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim_end();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        trimmed.to_owned()
    } else {
        let mut cut = trimmed.len() - STDERR_TAIL_BYTES;
        while !trimmed.is_char_boundary(cut) {
            cut += 1;
        }
        format!("…{}", &trimmed[cut..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_exit_code_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo boom >&2; exit 3"]);
        let err = run_tool("sh", &mut cmd).unwrap_err();
        assert_eq!(err.exit_code, Some(3));
        assert!(err.stderr_tail.contains("boom"));
        assert_eq!(err.argv[0], "sh");
    }

    #[test]
    fn missing_binary_reports_launch_failure() {
        let mut cmd = Command::new("definitely-not-a-real-binary-xyz");
        let err = run_tool("definitely-not-a-real-binary-xyz", &mut cmd).unwrap_err();
        assert_eq!(err.exit_code, None);
        assert!(err.stderr_tail.contains("failed to launch"));
    }

    #[test]
    fn success_passes_through() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo ok"]);
        let out = run_tool("sh", &mut cmd).unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "ok");
    }
}
