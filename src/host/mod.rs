pub mod lxc;

use std::path::{Path, PathBuf};

use crate::channel::CommandError;

/// What `destroy` found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destroyed {
    Removed,
    AlreadyAbsent,
}

/// A device attached to a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Device {
    /// Bridged nic on `parent`
    Nic { parent: String },
    /// Host directory bind mounted at `path`
    Disk { source: PathBuf, path: String },
}

impl Device {
    pub fn kind(&self) -> &'static str {
        match self {
            Device::Nic { .. } => "nic",
            Device::Disk { .. } => "disk",
        }
    }

    /// key=value properties as the container tool takes them
    pub fn properties(&self) -> Vec<String> {
        match self {
            Device::Nic { parent } => vec![
                String::from("nictype=bridged"),
                format!("parent={parent}"),
                String::from("name=eth0"),
            ],
            Device::Disk { source, path } => {
                vec![format!("source={}", source.display()), format!("path={path}")]
            }
        }
    }
}

/// - Manages container instances through the container tool
/// - Touches the host for identity files and persistent directories
pub trait Host {
    fn exists(&self, name: &str) -> Result<bool, CommandError>;

    /// Removes the container whatever state it is in. Absence is not an error.
    fn destroy(&self, name: &str) -> Result<Destroyed, CommandError>;

    fn init(&self, image: &str, name: &str) -> Result<(), CommandError>;
    fn set_config(&self, name: &str, key: &str, value: &str) -> Result<(), CommandError>;
    fn add_device(&self, name: &str, device_name: &str, device: &Device)
        -> Result<(), CommandError>;
    fn start(&self, name: &str) -> Result<(), CommandError>;

    fn read_host_file(&self, path: &Path) -> anyhow::Result<String>;

    /// Creates `path` on the host if needed and hands it to `uid:gid`.
    fn prepare_host_dir(&self, path: &Path, uid: u32, gid: u32) -> anyhow::Result<()>;
}
