//! Launch-wide settings, passed by value to the launcher.
//!
//! Nothing here is global: `LaunchConfig::default()` spells out the fallbacks below and
//! the binary overrides individual fields from its flags.

use std::{path::PathBuf, time::Duration};

pub const DEFAULT_PERSISTENT_ROOT: &str = "/srv/relaunch";
pub const DEFAULT_TIMEZONE: &str = "Etc/UTC";
pub const DEFAULT_TOOL: &str = "lxc";

/// uid/gid the first regular user gets on every supported guest family
pub const DEFAULT_GUEST_ID: u32 = 1000;

pub const DEFAULT_START_SETTLE: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_NETWORK_SETTLE: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locale {
    /// e.g. `en`
    pub language: String,
    /// e.g. `US`
    pub region: String,
    pub keyboard_layout: String,
    pub keyboard_model: String,
}

impl Locale {
    pub fn locale_name(&self) -> String {
        format!("{}_{}.UTF-8", self.language, self.region)
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            language: String::from("en"),
            region: String::from("US"),
            keyboard_layout: String::from("us"),
            keyboard_model: String::from("pc105"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LaunchConfig {
    /// Host bridge for eth0, `None` leaves the profile's network alone
    pub bridge: Option<String>,
    /// Host user that gets an admin account (and id mapping) in machines that want one
    pub admin_user: Option<String>,
    /// Each container gets `<root>/<name>/` for its persistent mounts
    pub persistent_root: PathBuf,
    pub locale: Locale,
    pub timezone: String,

    pub guest_uid: u32,
    pub guest_gid: u32,

    pub passwd_path: PathBuf,
    pub subuid_path: PathBuf,
    pub subgid_path: PathBuf,

    /// Pause between configuring and starting
    pub start_settle: Duration,
    pub poll_interval: Duration,
    /// Pause after the route shows up
    pub network_settle: Duration,
    /// `None` waits forever
    pub network_timeout: Option<Duration>,

    /// Container tool binary
    pub tool: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            bridge: None,
            admin_user: None,
            persistent_root: PathBuf::from(DEFAULT_PERSISTENT_ROOT),
            locale: Locale::default(),
            timezone: String::from(DEFAULT_TIMEZONE),
            guest_uid: DEFAULT_GUEST_ID,
            guest_gid: DEFAULT_GUEST_ID,
            passwd_path: PathBuf::from("/etc/passwd"),
            subuid_path: PathBuf::from("/etc/subuid"),
            subgid_path: PathBuf::from("/etc/subgid"),
            start_settle: DEFAULT_START_SETTLE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            network_settle: DEFAULT_NETWORK_SETTLE,
            network_timeout: None,
            tool: String::from(DEFAULT_TOOL),
        }
    }
}

impl LaunchConfig {
    /// Where the persistent mount `mount` of container `container` lives on the host.
    pub fn persistent_dir(&self, container: &str, mount: &str) -> PathBuf {
        self.persistent_root.join(container).join(mount)
    }
}
