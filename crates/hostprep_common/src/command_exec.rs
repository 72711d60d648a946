//! Command execution layer
//!
//! Every OS and hypervisor command a step issues goes through here:
//! - captures exit code, stdout, stderr, duration
//! - does not reinterpret errors, it passes them on as received
//! - in dry mode, mutating commands are logged and reported as skipped
//!
//! Read-only probes (`CommandSpec::read_only`) always execute, so validation
//! and polling work in dry mode too.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::StepError;

/// Maximum output length to capture
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// A command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Data piped to stdin
    pub stdin: Option<String>,
    /// Probe that changes nothing; runs even in dry mode
    pub read_only: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            read_only: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Command line as shown to the operator and in logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Exit code 0
    Success,
    /// Ran but returned non-zero
    NonZeroExit,
    /// Program not found
    CommandNotFound,
    PermissionDenied,
    /// Not executed because of dry mode
    Skipped,
    /// Other OS error while spawning
    OsError,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NonZeroExit => "non-zero exit",
            Self::CommandNotFound => "command not found",
            Self::PermissionDenied => "permission denied",
            Self::Skipped => "skipped (dry run)",
            Self::OsError => "OS error",
        }
    }
}

/// Result of running one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_line: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub status: ExecutionStatus,
}

impl CommandResult {
    /// Success or a dry-run skip
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Success | ExecutionStatus::Skipped
        )
    }

    /// Turn a failed command into an ExternalCommandFailure
    pub fn check(self) -> Result<Self, StepError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(StepError::Command {
                command: self.command_line,
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    fn skipped(command_line: String) -> Self {
        Self {
            command_line,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            status: ExecutionStatus::Skipped,
        }
    }
}

/// Something that can run commands
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> CommandResult;

    /// Whether mutating commands are being skipped
    fn dry_run(&self) -> bool;
}

/// Runs commands on the real system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner {
    dry_run: bool,
}

impl SystemCommandRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> CommandResult {
        let command_line = spec.display();
        if self.dry_run && !spec.read_only {
            info!("[dry-run] would run: {}", command_line);
            return CommandResult::skipped(command_line);
        }

        if spec.read_only {
            debug!("probe: {}", command_line);
        } else {
            info!("run: {}", command_line);
        }

        let start = Instant::now();
        let spawned = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let output = spawned.and_then(|mut child| {
            if let (Some(data), Some(mut pipe)) = (&spec.stdin, child.stdin.take()) {
                pipe.write_all(data.as_bytes())?;
            }
            child.wait_with_output()
        });
        let duration_ms = start.elapsed().as_millis() as u64;

        match output {
            Ok(output) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let stderr = truncate_output(&output.stderr);
                let status = if output.status.success() {
                    ExecutionStatus::Success
                } else if stderr.contains("Permission denied") {
                    ExecutionStatus::PermissionDenied
                } else {
                    ExecutionStatus::NonZeroExit
                };
                CommandResult {
                    command_line,
                    exit_code,
                    stdout: truncate_output(&output.stdout),
                    stderr,
                    duration_ms,
                    status,
                }
            }
            Err(e) => {
                let status = match e.kind() {
                    std::io::ErrorKind::NotFound => ExecutionStatus::CommandNotFound,
                    std::io::ErrorKind::PermissionDenied => ExecutionStatus::PermissionDenied,
                    _ => ExecutionStatus::OsError,
                };
                CommandResult {
                    command_line,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("OS error: {}", e),
                    duration_ms,
                    status,
                }
            }
        }
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let slice = if bytes.len() > MAX_OUTPUT_BYTES {
        &bytes[..MAX_OUTPUT_BYTES]
    } else {
        bytes
    };
    String::from_utf8_lossy(slice).into_owned()
}

/// Records commands instead of running them; replies from a script
///
/// Replies are matched by command-line prefix, first match wins, and are
/// consumed in order when several are queued for the same prefix. Anything
/// unmatched succeeds with empty output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<String>>,
    replies: RefCell<Vec<(String, i32, String)>>,
    dry_run: bool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Queue a reply for the next command starting with `prefix`
    pub fn reply(&self, prefix: &str, exit_code: i32, stdout: &str) -> &Self {
        self.replies
            .borrow_mut()
            .push((prefix.to_string(), exit_code, stdout.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> CommandResult {
        let command_line = spec.display();
        self.calls.borrow_mut().push(command_line.clone());
        if self.dry_run && !spec.read_only {
            return CommandResult::skipped(command_line);
        }

        let mut replies = self.replies.borrow_mut();
        let position = replies
            .iter()
            .position(|(prefix, _, _)| command_line.starts_with(prefix.as_str()));
        let reply = position.map(|idx| replies.remove(idx));

        let (exit_code, stdout) = match reply {
            Some((_, code, out)) => (code, out),
            None => (0, String::new()),
        };
        CommandResult {
            command_line,
            exit_code,
            stdout,
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "scripted failure".to_string()
            },
            duration_ms: 0,
            status: if exit_code == 0 {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::NonZeroExit
            },
        }
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }
}
