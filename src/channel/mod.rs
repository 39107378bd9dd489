use itertools::Itertools;
use std::io;
use tracing::{debug, warn};

/// Exit status reported by the container tool. `None` when killed by a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandStatus {
    pub code: Option<i32>,
}

impl CommandStatus {
    pub const SUCCESS: CommandStatus = CommandStatus { code: Some(0) };

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for CommandStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            status: output.status.into(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to run `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {}", render_code(*.code))]
    Failed { command: String, code: Option<i32> },
    #[error("unexpected output from `{command}`: {reason}")]
    Output { command: String, reason: String },
}

impl CommandError {
    /// The exit code of the failed command, if it got far enough to have one.
    pub fn code(&self) -> Option<i32> {
        match self {
            CommandError::Failed { code, .. } => *code,
            _ => None,
        }
    }
}

fn render_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => String::from("a signal"),
    }
}

pub fn render_argv<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter().map(AsRef::as_ref).join(" ")
}

/// Runs commands inside a named container.
///
/// Only a failure to start the container tool is an `Err`; a command that ran and
/// exited non-zero comes back as a status for the caller to judge.
pub trait Channel {
    fn execute(&self, container: &str, argv: &[String]) -> Result<CommandStatus, CommandError>;

    fn execute_capturing_output(
        &self,
        container: &str,
        argv: &[String],
    ) -> Result<CommandOutput, CommandError>;

    fn pipe_input(
        &self,
        container: &str,
        argv: &[String],
        input: &[u8],
    ) -> Result<CommandStatus, CommandError>;

    fn pipe_input_output(
        &self,
        container: &str,
        argv: &[String],
        input: &[u8],
    ) -> Result<CommandOutput, CommandError>;

    fn write_file(
        &self,
        container: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<CommandStatus, CommandError>;
}

/// Whether a non-zero exit aborts the launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Criticality {
    Fatal,
    BestEffort,
}

/// A channel bound to one container.
pub struct Session<'a> {
    channel: &'a dyn Channel,
    container: &'a str,
}

impl<'a> Session<'a> {
    pub fn new(channel: &'a dyn Channel, container: &'a str) -> Self {
        Self { channel, container }
    }

    pub fn container(&self) -> &str {
        self.container
    }

    fn judge(
        &self,
        command: String,
        status: CommandStatus,
        criticality: Criticality,
    ) -> Result<CommandStatus, CommandError> {
        if status.success() {
            return Ok(status);
        }

        match criticality {
            Criticality::Fatal => Err(CommandError::Failed {
                command,
                code: status.code,
            }),
            Criticality::BestEffort => {
                warn!(
                    "{}: `{}` failed with {}, continuing",
                    self.container,
                    command,
                    render_code(status.code)
                );
                Ok(status)
            }
        }
    }

    pub fn run<S: AsRef<str>>(
        &self,
        argv: &[S],
        criticality: Criticality,
    ) -> Result<CommandStatus, CommandError> {
        let argv = to_owned(argv);
        let command = render_argv(&argv);
        debug!("{}: {}", self.container, command);

        let status = self.channel.execute(self.container, &argv)?;
        self.judge(command, status, criticality)
    }

    /// Runs `script` through `sh -c`.
    pub fn run_shell(
        &self,
        script: &str,
        criticality: Criticality,
    ) -> Result<CommandStatus, CommandError> {
        self.run(&["sh", "-c", script], criticality)
    }

    /// Runs a command and returns its stdout. Always fatal.
    pub fn capture<S: AsRef<str>>(&self, argv: &[S]) -> Result<Vec<u8>, CommandError> {
        let argv = to_owned(argv);
        let command = render_argv(&argv);
        debug!("{}: {} (captured)", self.container, command);

        let output = self.channel.execute_capturing_output(self.container, &argv)?;
        self.judge(command, output.status, Criticality::Fatal)?;
        Ok(output.stdout)
    }

    pub fn pipe<S: AsRef<str>>(
        &self,
        argv: &[S],
        input: &[u8],
        criticality: Criticality,
    ) -> Result<CommandStatus, CommandError> {
        let argv = to_owned(argv);
        let command = render_argv(&argv);
        debug!("{}: {} (<- {} bytes)", self.container, command, input.len());

        let status = self.channel.pipe_input(self.container, &argv, input)?;
        self.judge(command, status, criticality)
    }

    pub fn pipe_capture<S: AsRef<str>>(
        &self,
        argv: &[S],
        input: &[u8],
    ) -> Result<Vec<u8>, CommandError> {
        let argv = to_owned(argv);
        let command = render_argv(&argv);
        debug!(
            "{}: {} (<- {} bytes, captured)",
            self.container,
            command,
            input.len()
        );

        let output = self
            .channel
            .pipe_input_output(self.container, &argv, input)?;
        self.judge(command, output.status, Criticality::Fatal)?;
        Ok(output.stdout)
    }

    pub fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), CommandError> {
        debug!("{}: write {} ({} bytes)", self.container, path, contents.len());

        let status = self.channel.write_file(self.container, path, contents)?;
        self.judge(format!("write {path}"), status, Criticality::Fatal)?;
        Ok(())
    }
}

fn to_owned<S: AsRef<str>>(argv: &[S]) -> Vec<String> {
    argv.iter().map(|a| a.as_ref().to_string()).collect()
}
