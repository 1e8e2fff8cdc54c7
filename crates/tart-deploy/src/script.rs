//! The `tartconfig` setup script.
//!
//! An optional shell script at the root of a deployment that prepares the
//! tree (install dependencies, build assets). Its combined output is
//! streamed line by line to whoever triggered the run.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use tart_supervisor::{TartError, TartResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

pub const TARTCONFIG: &str = "tartconfig";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// The deployment has no `tartconfig`.
    Missing,
    Succeeded,
    Failed { code: Option<i32> },
}

/// Run `<dir>/tartconfig` with `env` overlaid, copying its output to `sink`.
///
/// A script that cannot be started is an error; one that exits non-zero
/// is an outcome.
pub async fn run_tartconfig(
    dir: &Path,
    env: &[(String, String)],
    sink: &mut (dyn Write + Send),
) -> TartResult<ScriptOutcome> {
    if !dir.join(TARTCONFIG).is_file() {
        debug!(?dir, "no tartconfig present");
        return Ok(ScriptOutcome::Missing);
    }

    let mut child = Command::new("/bin/sh")
        .arg(TARTCONFIG)
        .current_dir(dir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| TartError::ExecutionFailed(format!("Failed to run {TARTCONFIG}: {e}")))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(TartError::ExecutionFailed(format!(
            "{TARTCONFIG} output pipes unavailable"
        )));
    };
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let (mut stdout_open, mut stderr_open) = (true, true);

    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => { let _ = writeln!(sink, "{line}"); }
                _ => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => { let _ = writeln!(sink, "{line}"); }
                _ => stderr_open = false,
            },
        }
    }
    let _ = sink.flush();

    let status = child
        .wait()
        .await
        .map_err(|e| TartError::ExecutionFailed(format!("Failed to wait on {TARTCONFIG}: {e}")))?;
    if status.success() {
        Ok(ScriptOutcome::Succeeded)
    } else {
        warn!(?dir, %status, "tartconfig failed");
        Ok(ScriptOutcome::Failed {
            code: status.code(),
        })
    }
}
