use std::path::{Path, PathBuf};
use std::process::Stdio;

use colored::{Color, Colorize};
use compio::{io::compat::AsyncStream, process::Command, runtime::spawn};
use futures::{AsyncBufReadExt, AsyncRead, StreamExt, io::BufReader};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::ext::BestEffortPathExt;

/// Command that exercises a staged tree, e.g. `go test ./...`.
///
/// Arguments are handed to the program as they are, so words containing
/// spaces keep their boundaries. Use [`TestCommand::shell`] to run a single
/// command line through the platform shell instead.
#[derive(Debug, Clone)]
pub struct TestCommand {
    label: String,
    program: String,
    args: Vec<String>,
    display: String,
}

impl TestCommand {
    pub fn new<I, S>(label: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        let args = args.into_iter().map(Into::into).collect::<Vec<String>>();
        let display = std::iter::once(&program)
            .chain(&args)
            .map(|word| {
                if word.is_empty() || word.contains(char::is_whitespace) {
                    format!("'{word}'")
                } else {
                    word.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            label: label.into(),
            program,
            args,
            display,
        }
    }

    /// Splits an argument vector into program and arguments. Returns `None`
    /// for an empty vector.
    pub fn from_argv(label: impl Into<String>, argv: Vec<String>) -> Option<Self> {
        let mut words = argv.into_iter();
        let program = words.next()?;
        Some(Self::new(label, program, words))
    }

    /// Runs `command_line` through `sh -c` (or `cmd /C` on Windows).
    pub fn shell(label: impl Into<String>, command_line: impl Into<String>) -> Self {
        let (shell, flag) = Self::platform_shell();
        let command_line = command_line.into();
        let mut command = Self::new(label, shell, [flag.to_string(), command_line.clone()]);
        command.display = command_line;
        command
    }

    /// Human readable form of the command, used in logs and errors.
    pub fn command(&self) -> &str {
        &self.display
    }

    /// Runs the command with `working_dir` as its current directory, echoing
    /// its output line by line. A non-zero exit is an error.
    pub async fn run(&self, working_dir: &Path) -> Result<(), RunError> {
        let mut cmd = self.create_command(working_dir);
        debug!(
            command = %self.display,
            dir = %working_dir.display(),
            "Spawning test command"
        );

        let mut handle = cmd.spawn().context(SpawnSnafu {
            command: self.display.clone(),
            dir: working_dir.to_path_buf(),
        })?;

        let mut forwarders = Vec::new();
        if let Some(stdout) = handle.stdout.take() {
            forwarders.push(spawn(forward_lines(
                AsyncStream::new(stdout),
                self.label.clone(),
                Color::Cyan,
            )));
        }
        if let Some(stderr) = handle.stderr.take() {
            forwarders.push(spawn(forward_lines(
                AsyncStream::new(stderr),
                self.label.clone(),
                Color::Yellow,
            )));
        }

        let status = handle.wait().await.context(WaitSnafu {
            command: self.display.clone(),
        })?;
        for forwarder in forwarders {
            if forwarder.await.is_err() {
                debug!("Output forwarder of '{}' panicked", self.label);
            }
        }

        if status.success() {
            info!("Command '{}' succeeded", self.display);
            Ok(())
        } else {
            UnsuccessfulExecutionSnafu {
                command: self.display.clone(),
                status: status.code().unwrap_or(-1),
            }
            .fail()
        }
    }

    /// Returns the shell and its command flag for the current platform.
    fn platform_shell() -> (&'static str, &'static str) {
        #[cfg(target_family = "windows")]
        {
            ("cmd", "/C")
        }
        #[cfg(target_family = "unix")]
        {
            ("sh", "-c")
        }
    }

    fn create_command(&self, working_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.current_dir(working_dir);
        let _ = cmd.stdout(Stdio::piped());
        let _ = cmd.stderr(Stdio::piped());
        cmd
    }
}

async fn forward_lines<S>(stream: S, label: String, color: Color)
where
    S: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Some(line_result) = lines.next().await {
        match line_result {
            Ok(line) => {
                if !line.trim().is_empty() {
                    print_from_command(&label, color, line.trim_end());
                }
            }
            Err(e) => {
                debug!("Error reading output of '{}': {}", label, e);
            }
        }
    }
}

fn print_from_command(label: &str, color: Color, line: &str) {
    println!("{} {}", format!("[{label}]").color(color).bold(), line);
}

#[derive(Debug, Snafu)]
pub enum RunError {
    #[snafu(display(
        "Failed to spawn command '{}' in {}",
        command,
        dir.best_effort_path_display()
    ))]
    SpawnError {
        command: String,
        dir: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to wait for command '{}'", command))]
    WaitError {
        command: String,
        source: std::io::Error,
    },
    #[snafu(display("Command '{}' failed with exit code {}", command, status))]
    UnsuccessfulExecution { command: String, status: i32 },
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[compio::test]
    async fn successful_command_is_ok() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = TestCommand::shell("test", "true").run(temp_dir.path()).await;
        assert!(result.is_ok());
    }

    #[compio::test]
    async fn command_runs_inside_working_dir() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::write(temp_dir.path().join("marker.go"), "package marker\n").unwrap();

        let result = TestCommand::new("test", "test", ["-f", "marker.go"])
            .run(temp_dir.path())
            .await;

        assert!(result.is_ok());
    }

    #[compio::test]
    async fn failing_command_reports_exit_code() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");

        let result = TestCommand::shell("test", "echo failing >&2; exit 3")
            .run(temp_dir.path())
            .await;

        match result {
            Err(RunError::UnsuccessfulExecution { status, .. }) => assert_eq!(status, 3),
            other => panic!("Expected UnsuccessfulExecution, got {other:?}"),
        }
    }

    #[compio::test]
    async fn missing_working_dir_fails_to_spawn() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let missing = temp_dir.path().join("gone");

        let result = TestCommand::shell("test", "true").run(&missing).await;

        assert!(matches!(result, Err(RunError::SpawnError { .. })));
    }

    #[compio::test]
    async fn arguments_keep_their_boundaries() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let argv = ["test", "a b", "=", "a b"]
            .map(String::from)
            .to_vec();
        let command = TestCommand::from_argv("test", argv).unwrap();

        let result = command.run(temp_dir.path()).await;

        assert!(result.is_ok(), "{result:?}");
        assert_eq!(command.command(), "test 'a b' = 'a b'");
    }

    #[compio::test]
    async fn shell_metacharacters_in_arguments_stay_literal() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let command = TestCommand::new("test", "test", ["x; exit 1", "=", "x; exit 1"]);

        let result = command.run(temp_dir.path()).await;

        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn empty_argv_has_no_command() {
        assert!(TestCommand::from_argv("test", Vec::new()).is_none());
    }

    #[test]
    fn shell_command_displays_its_line() {
        let command = TestCommand::shell("test", "go test ./... | tee log");
        assert_eq!(command.command(), "go test ./... | tee log");
    }

    #[test]
    fn error_display_names_the_command() {
        let error = RunError::UnsuccessfulExecution {
            command: "go test ./...".to_string(),
            status: 1,
        };
        let message = format!("{error}");
        assert!(message.contains("go test ./..."));
        assert!(message.contains("exit code 1"));
    }
}
