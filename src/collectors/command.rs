//! Child-process execution with deadline and cancellation handling.
//!
//! Used by the native collectors for `command` artifacts. The child is
//! spawned with `kill_on_drop` so every early-exit path (timeout,
//! cancellation) reliably terminates it.

use std::process::Stdio;

use log::debug;
use tokio::process::Command;

use super::CollectContext;

/// Outcome of running one OS utility.
#[derive(Debug)]
pub enum CommandOutcome {
    Captured {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_code: Option<i32>,
    },
    TimedOut,
    Cancelled,
    /// The binary does not exist on this host.
    NotFound(String),
    PermissionDenied(String),
    SpawnFailed(String),
}

/// Run `program` with whitespace-split `args`, capturing both streams.
pub async fn run_command(program: &str, args: &[&str], ctx: &CollectContext) -> CommandOutcome {
    if ctx.is_cancelled() {
        return CommandOutcome::Cancelled;
    }

    debug!("Running command: {} {}", program, args.join(" "));

    let spawned = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match spawned {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return CommandOutcome::NotFound(program.to_string());
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return CommandOutcome::PermissionDenied(format!("{}: {}", program, e));
        }
        Err(e) => {
            return CommandOutcome::SpawnFailed(format!("{}: {}", program, e));
        }
    };

    let wait = child.wait_with_output();
    tokio::pin!(wait);

    tokio::select! {
        result = &mut wait => match result {
            Ok(output) => CommandOutcome::Captured {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.status.code(),
            },
            Err(e) => CommandOutcome::SpawnFailed(format!("{}: {}", program, e)),
        },
        _ = tokio::time::sleep(ctx.remaining()) => {
            // dropping the wait future drops the child; kill_on_drop fires
            CommandOutcome::TimedOut
        }
        _ = ctx.cancel.cancelled() => CommandOutcome::Cancelled,
    }
}

/// Split a parameter string into argv entries. Quoting is not supported;
/// catalogue entries keep their arguments simple.
pub fn split_args(args: &str) -> Vec<&str> {
    args.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::tests::test_context;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_captures_stdout() {
        let ctx = test_context();
        match run_command("echo", &["triage"], &ctx).await {
            CommandOutcome::Captured {
                stdout, exit_code, ..
            } => {
                assert_eq!(String::from_utf8_lossy(&stdout).trim(), "triage");
                assert_eq!(exit_code, Some(0));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_found() {
        let ctx = test_context();
        match run_command("definitely-not-a-real-tool-xyz", &[], &ctx).await {
            CommandOutcome::NotFound(name) => {
                assert_eq!(name, "definitely-not-a-real-tool-xyz")
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deadline_kills_slow_command() {
        let mut ctx = test_context();
        ctx.deadline = Instant::now() + Duration::from_millis(100);
        let started = Instant::now();
        match run_command("sleep", &["5"], &ctx).await {
            CommandOutcome::TimedOut => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancellation_stops_command() {
        let ctx = test_context();
        ctx.cancel.cancel();
        match run_command("sleep", &["5"], &ctx).await {
            CommandOutcome::Cancelled => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("-tunap"), vec!["-tunap"]);
        assert_eq!(split_args("qe System  /c:2000"), vec!["qe", "System", "/c:2000"]);
        assert!(split_args("").is_empty());
    }
}
