//! A recording stand-in for lxc, used by the unit tests.

use anyhow::Context;
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    channel::{render_argv, Channel, CommandError, CommandOutput, CommandStatus},
    host::{Destroyed, Device, Host},
    network::Sleeper,
};

pub const ROUTE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t00000000\t0103000A\t0003\t0\t0\t0\t00000000\t0\t0\t0
eth0\t0003000A\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
";

pub const NO_ROUTE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t0003000A\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Destroy(String),
    Init { image: String, name: String },
    Config { name: String, key: String, value: String },
    Device { name: String, device: String, spec: Device },
    Start(String),
    HostDir { path: PathBuf, uid: u32, gid: u32 },
    Exec(Vec<String>),
    Pipe { argv: Vec<String>, input: String },
    Write { path: String, contents: String },
}

impl Call {
    pub fn exec(argv: &[&str]) -> Self {
        Call::Exec(argv.iter().map(|a| a.to_string()).collect())
    }

    pub fn pipe(argv: &[&str], input: &str) -> Self {
        Call::Pipe {
            argv: argv.iter().map(|a| a.to_string()).collect(),
            input: input.to_string(),
        }
    }

    pub fn write(path: &str, contents: &str) -> Self {
        Call::Write {
            path: path.to_string(),
            contents: contents.to_string(),
        }
    }

    /// What `fail_when` and `respond` patterns are matched against
    pub fn rendered(&self) -> String {
        match self {
            Call::Destroy(name) => format!("destroy {name}"),
            Call::Init { image, name } => format!("init {image} {name}"),
            Call::Config { name, key, value } => format!("config {name} {key} {value}"),
            Call::Device { name, device, .. } => format!("device {name} {device}"),
            Call::Start(name) => format!("start {name}"),
            Call::HostDir { path, .. } => format!("chown {}", path.display()),
            Call::Exec(argv) | Call::Pipe { argv, .. } => render_argv(argv),
            Call::Write { path, .. } => format!("write {path}"),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Call::Exec(_) | Call::Pipe { .. } | Call::Write { .. })
    }
}

#[derive(Default)]
pub struct Fake {
    calls: RefCell<Vec<Call>>,
    existing: RefCell<HashSet<String>>,
    fail: RefCell<Vec<String>>,
    fail_once: RefCell<Vec<String>>,
    responses: RefCell<Vec<(String, Vec<u8>)>>,
    routes: RefCell<VecDeque<String>>,
    host_files: RefCell<HashMap<PathBuf, String>>,
}

impl Fake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.calls.borrow().iter().map(Call::rendered).collect()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn with_container(&self, name: &str) {
        self.existing.borrow_mut().insert(name.to_string());
    }

    pub fn container_exists(&self, name: &str) -> bool {
        self.existing.borrow().contains(name)
    }

    pub fn with_host_file(&self, path: &str, contents: &str) {
        self.host_files
            .borrow_mut()
            .insert(PathBuf::from(path), contents.to_string());
    }

    /// Every call rendering with this prefix exits 1
    pub fn fail_when(&self, prefix: &str) {
        self.fail.borrow_mut().push(prefix.to_string());
    }

    /// Only the next call rendering with this prefix exits 1
    pub fn fail_once(&self, prefix: &str) {
        self.fail_once.borrow_mut().push(prefix.to_string());
    }

    /// stdout for captured calls rendering with this prefix
    pub fn respond(&self, prefix: &str, stdout: &[u8]) {
        self.responses
            .borrow_mut()
            .push((prefix.to_string(), stdout.to_vec()));
    }

    /// route tables handed out to successive probes, a ready table once these run out
    pub fn queue_routes(&self, tables: &[&str]) {
        self.routes
            .borrow_mut()
            .extend(tables.iter().map(|t| t.to_string()));
    }

    fn record(&self, call: Call) -> CommandStatus {
        let rendered = call.rendered();
        self.calls.borrow_mut().push(call);

        let mut once = self.fail_once.borrow_mut();
        if let Some(idx) = once.iter().position(|p| rendered.starts_with(p.as_str())) {
            once.remove(idx);
            return CommandStatus { code: Some(1) };
        }

        if self
            .fail
            .borrow()
            .iter()
            .any(|p| rendered.starts_with(p.as_str()))
        {
            CommandStatus { code: Some(1) }
        } else {
            CommandStatus::SUCCESS
        }
    }

    fn record_host(&self, call: Call) -> Result<(), CommandError> {
        let command = call.rendered();
        let status = self.record(call);
        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Failed {
                command,
                code: status.code,
            })
        }
    }

    fn stdout_for(&self, rendered: &str) -> Vec<u8> {
        if rendered == "cat /proc/net/route" {
            return self
                .routes
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| ROUTE.to_string())
                .into_bytes();
        }

        self.responses
            .borrow()
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default()
    }
}

impl Host for Fake {
    fn exists(&self, name: &str) -> Result<bool, CommandError> {
        Ok(self.container_exists(name))
    }

    fn destroy(&self, name: &str) -> Result<Destroyed, CommandError> {
        self.record_host(Call::Destroy(name.to_string()))?;

        if self.existing.borrow_mut().remove(name) {
            Ok(Destroyed::Removed)
        } else {
            Ok(Destroyed::AlreadyAbsent)
        }
    }

    fn init(&self, image: &str, name: &str) -> Result<(), CommandError> {
        self.record_host(Call::Init {
            image: image.to_string(),
            name: name.to_string(),
        })?;
        self.existing.borrow_mut().insert(name.to_string());
        Ok(())
    }

    fn set_config(&self, name: &str, key: &str, value: &str) -> Result<(), CommandError> {
        self.record_host(Call::Config {
            name: name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn add_device(
        &self,
        name: &str,
        device_name: &str,
        device: &Device,
    ) -> Result<(), CommandError> {
        self.record_host(Call::Device {
            name: name.to_string(),
            device: device_name.to_string(),
            spec: device.clone(),
        })
    }

    fn start(&self, name: &str) -> Result<(), CommandError> {
        self.record_host(Call::Start(name.to_string()))
    }

    fn read_host_file(&self, path: &Path) -> anyhow::Result<String> {
        self.host_files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
            .with_context(|| format!("reading {}", path.display()))
    }

    fn prepare_host_dir(&self, path: &Path, uid: u32, gid: u32) -> anyhow::Result<()> {
        self.record_host(Call::HostDir {
            path: path.to_path_buf(),
            uid,
            gid,
        })?;
        Ok(())
    }
}

impl Channel for Fake {
    fn execute(&self, _container: &str, argv: &[String]) -> Result<CommandStatus, CommandError> {
        Ok(self.record(Call::Exec(argv.to_vec())))
    }

    fn execute_capturing_output(
        &self,
        _container: &str,
        argv: &[String],
    ) -> Result<CommandOutput, CommandError> {
        let rendered = render_argv(argv);
        let status = self.record(Call::Exec(argv.to_vec()));
        let stdout = if status.success() {
            self.stdout_for(&rendered)
        } else {
            Vec::new()
        };

        Ok(CommandOutput {
            status,
            stdout,
            stderr: Vec::new(),
        })
    }

    fn pipe_input(
        &self,
        _container: &str,
        argv: &[String],
        input: &[u8],
    ) -> Result<CommandStatus, CommandError> {
        Ok(self.record(Call::Pipe {
            argv: argv.to_vec(),
            input: String::from_utf8_lossy(input).into_owned(),
        }))
    }

    fn pipe_input_output(
        &self,
        _container: &str,
        argv: &[String],
        input: &[u8],
    ) -> Result<CommandOutput, CommandError> {
        let rendered = render_argv(argv);
        let status = self.record(Call::Pipe {
            argv: argv.to_vec(),
            input: String::from_utf8_lossy(input).into_owned(),
        });

        Ok(CommandOutput {
            status,
            stdout: self.stdout_for(&rendered),
            stderr: Vec::new(),
        })
    }

    fn write_file(
        &self,
        _container: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<CommandStatus, CommandError> {
        Ok(self.record(Call::Write {
            path: path.to_string(),
            contents: String::from_utf8_lossy(contents).into_owned(),
        }))
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    slept: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
    }
}
