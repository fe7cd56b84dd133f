use std::io;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Exit status and captured streams of a finished external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        text
    }

    /// Human readable exit code for error messages
    pub fn code_label(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("command timed out after {0:?}")]
    TimedOut(Duration),
    #[error("command not found: {0}")]
    NotFound(String),
    #[error("failed to run {program}: {source}")]
    Io { program: String, source: io::Error },
    #[error("empty command line")]
    EmptyCommand,
}

/// Runs an external command with a deadline and captures its output.
///
/// Probes only talk to the outside world through this trait so they can be
/// exercised without spawning processes.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[String], deadline: Duration) -> Result<CommandOutput, RunError>;
}

/// [`CommandRunner`] backed by real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String], deadline: Duration) -> Result<CommandOutput, RunError> {
        let (program, args) = argv.split_first().ok_or(RunError::EmptyCommand)?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed out child is dropped with the future below and must not linger.
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => RunError::NotFound(program.clone()),
                _ => RunError::Io { program: program.clone(), source },
            })?;

        let output = timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| RunError::TimedOut(deadline))?
            .map_err(|source| RunError::Io { program: program.clone(), source })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_combined_output_order() {
        let output = CommandOutput { code: Some(1), stdout: "out ".into(), stderr: "err".into() };
        assert_eq!(output.combined(), "out err");
        assert!(!output.success());
        assert_eq!(output.code_label(), "1");
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let result = ProcessRunner
            .run(&argv(&["netmon-definitely-missing-binary"]), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(RunError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_command_line() {
        let result = ProcessRunner.run(&[], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RunError::EmptyCommand)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_both_streams() {
        let output = ProcessRunner
            .run(&argv(&["sh", "-c", "echo out; echo err 1>&2; exit 3"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let started = std::time::Instant::now();
        let result = ProcessRunner
            .run(&argv(&["sleep", "5"]), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(RunError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
