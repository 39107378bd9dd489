use anyhow::{ensure, Context};
use serde::Deserialize;
use std::{
    fs,
    io::{self, Write},
    path::Path,
    process::{Command, Stdio},
    thread,
};
use tracing::{debug, info};

use super::{Destroyed, Device, Host};
use crate::channel::{render_argv, Channel, CommandError, CommandOutput, CommandStatus};

/// The lxd command line client (or its incus fork, which takes the same arguments)
pub struct Lxc {
    pub tool: String,
}

#[derive(Debug, Deserialize)]
struct ListedInstance {
    name: String,
    #[serde(default)]
    status: String,
}

impl Lxc {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.tool);
        cmd.args(args);
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.tool, render_argv(args))
    }

    fn spawn_error(&self, source: std::io::Error) -> CommandError {
        CommandError::Spawn {
            program: self.tool.clone(),
            source,
        }
    }

    /// Runs a management command, output goes to our terminal.
    fn checked(&self, args: &[&str]) -> Result<(), CommandError> {
        debug!("{}", self.describe(args));

        let status = self
            .command(args)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| self.spawn_error(e))?;

        if !status.success() {
            return Err(CommandError::Failed {
                command: self.describe(args),
                code: status.code(),
            });
        }

        Ok(())
    }

    fn exec_args<'a>(container: &'a str, argv: &'a [String]) -> Vec<&'a str> {
        let mut args = vec!["exec", container, "--"];
        args.extend(argv.iter().map(String::as_str));
        args
    }

    fn run_with_input(
        &self,
        args: &[&str],
        input: &[u8],
        capture: bool,
    ) -> Result<CommandOutput, CommandError> {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(if capture {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .stderr(if capture {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            self.spawn_error(io::Error::new(io::ErrorKind::BrokenPipe, "no stdin"))
        })?;

        // feed stdin from another thread so a chatty command can't fill its stdout and stall us
        let output = thread::scope(|s| {
            let writer = s.spawn(move || match stdin.write_all(input) {
                // the command is allowed to stop reading early
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            });
            let output = child.wait_with_output();
            let written = writer_result(writer.join());
            output.and_then(|o| written.map(|_| o))
        })
        .map_err(|e| self.spawn_error(e))?;

        Ok(output.into())
    }
}

/// A writer that panicked never finished feeding stdin.
fn writer_result(joined: thread::Result<io::Result<()>>) -> io::Result<()> {
    joined.unwrap_or_else(|_| {
        Err(io::Error::new(
            io::ErrorKind::Other,
            "stdin writer panicked",
        ))
    })
}

impl Host for Lxc {
    fn exists(&self, name: &str) -> Result<bool, CommandError> {
        let args = ["list", name, "--format", "json"];
        let output = self
            .command(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: self.describe(&args),
                code: output.status.code(),
            });
        }

        let listed: Vec<ListedInstance> =
            serde_json::from_slice(&output.stdout).map_err(|e| CommandError::Output {
                command: self.describe(&args),
                reason: e.to_string(),
            })?;

        // the name argument is a filter, not an exact match
        match listed.iter().find(|i| i.name == name) {
            Some(instance) => {
                debug!("{} is {}", instance.name, instance.status);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn destroy(&self, name: &str) -> Result<Destroyed, CommandError> {
        if !self.exists(name)? {
            info!("{} does not exist, nothing to delete", name);
            return Ok(Destroyed::AlreadyAbsent);
        }

        self.checked(&["delete", "--force", name])?;
        Ok(Destroyed::Removed)
    }

    fn init(&self, image: &str, name: &str) -> Result<(), CommandError> {
        self.checked(&["init", image, name])
    }

    fn set_config(&self, name: &str, key: &str, value: &str) -> Result<(), CommandError> {
        self.checked(&["config", "set", name, key, value])
    }

    fn add_device(
        &self,
        name: &str,
        device_name: &str,
        device: &Device,
    ) -> Result<(), CommandError> {
        let properties = device.properties();
        let mut args = vec!["config", "device", "add", name, device_name, device.kind()];
        args.extend(properties.iter().map(String::as_str));
        self.checked(&args)
    }

    fn start(&self, name: &str) -> Result<(), CommandError> {
        self.checked(&["start", name])
    }

    fn read_host_file(&self, path: &Path) -> anyhow::Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }

    fn prepare_host_dir(&self, path: &Path, uid: u32, gid: u32) -> anyhow::Result<()> {
        fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))?;

        let owner = format!("{uid}:{gid}");
        let status = Command::new("chown")
            .arg("-R")
            .arg(&owner)
            .arg(path)
            .status()
            .context("running chown")?;
        ensure!(
            status.success(),
            "chown -R {} {} exited with {:?}",
            owner,
            path.display(),
            status.code()
        );

        Ok(())
    }
}

impl Channel for Lxc {
    fn execute(&self, container: &str, argv: &[String]) -> Result<CommandStatus, CommandError> {
        let status = self
            .command(&Self::exec_args(container, argv))
            .stdin(Stdio::null())
            .status()
            .map_err(|e| self.spawn_error(e))?;

        Ok(status.into())
    }

    fn execute_capturing_output(
        &self,
        container: &str,
        argv: &[String],
    ) -> Result<CommandOutput, CommandError> {
        let output = self
            .command(&Self::exec_args(container, argv))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        Ok(output.into())
    }

    fn pipe_input(
        &self,
        container: &str,
        argv: &[String],
        input: &[u8],
    ) -> Result<CommandStatus, CommandError> {
        let output = self.run_with_input(&Self::exec_args(container, argv), input, false)?;
        Ok(output.status)
    }

    fn pipe_input_output(
        &self,
        container: &str,
        argv: &[String],
        input: &[u8],
    ) -> Result<CommandOutput, CommandError> {
        self.run_with_input(&Self::exec_args(container, argv), input, true)
    }

    fn write_file(
        &self,
        container: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<CommandStatus, CommandError> {
        let target = format!("{container}{path}");
        let args = ["file", "push", "--create-dirs", "-", target.as_str()];
        let output = self.run_with_input(&args, contents, false)?;
        Ok(output.status)
    }
}

#[cfg(test)]
mod tests {
    use super::{writer_result, Device, Host, Lxc};
    use std::{
        io,
        path::{Path, PathBuf},
    };

    #[test]
    fn panicked_writer_is_an_error() {
        assert!(writer_result(Ok(Ok(()))).is_ok());

        let err = writer_result(Err(Box::new("boom"))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);

        let broken = writer_result(Ok(Err(io::Error::from(io::ErrorKind::UnexpectedEof))));
        assert_eq!(broken.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn host_read_names_the_file() {
        let err = Lxc::new("lxc")
            .read_host_file(Path::new("/nonexistent/relaunch/subuid"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("reading /nonexistent/relaunch/subuid"));
        assert!(err.downcast_ref::<io::Error>().is_some());
    }

    #[test]
    fn exec_args_separate_guest_argv() {
        let argv = vec![String::from("ls"), String::from("-la")];
        assert_eq!(
            Lxc::exec_args("box", &argv),
            vec!["exec", "box", "--", "ls", "-la"]
        );
    }

    #[test]
    fn device_properties() {
        let nic = Device::Nic {
            parent: String::from("br0"),
        };
        assert_eq!(nic.kind(), "nic");
        assert_eq!(
            nic.properties(),
            vec!["nictype=bridged", "parent=br0", "name=eth0"]
        );

        let disk = Device::Disk {
            source: PathBuf::from("/srv/relaunch/dev/home"),
            path: String::from("/home/alice"),
        };
        assert_eq!(
            disk.properties(),
            vec!["source=/srv/relaunch/dev/home", "path=/home/alice"]
        );
    }
}
