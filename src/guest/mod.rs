//! What can be done to a running guest, per OS family.
//!
//! Every family exposes the same surface; commands go through a [`Session`] so each one
//! carries its own [`Criticality`](crate::channel::Criticality).

pub mod alpine;
pub mod debian;
pub mod ubuntu;

pub use alpine::Alpine;
pub use debian::Debian;
pub use ubuntu::Ubuntu;

use crate::{
    channel::{CommandError, Session},
    config::Locale,
};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum OsFamily {
    Alpine,
    Debian,
    Ubuntu,
}

impl OsFamily {
    pub fn guest(self) -> Box<dyn Guest> {
        match self {
            OsFamily::Alpine => Box::new(Alpine),
            OsFamily::Debian => Box::new(Debian),
            OsFamily::Ubuntu => Box::new(Ubuntu::new(Debian)),
        }
    }
}

/// A third party package repository whose signing key has to be fetched first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedRepository {
    /// names the key and the repository definition
    pub name: String,
    pub key_url: String,
    pub repo_url: String,
    /// `None` uses the guest's own release codename
    pub suite: Option<String>,
    pub components: Vec<String>,
}

pub trait Guest {
    fn family(&self) -> OsFamily;

    fn set_locale(&self, s: &Session, locale: &Locale) -> Result<(), CommandError>;
    fn set_timezone(&self, s: &Session, zone: &str) -> Result<(), CommandError>;

    fn install_packages(&self, s: &Session, names: &[&str]) -> Result<(), CommandError>;
    fn remove_packages(&self, s: &Session, names: &[&str]) -> Result<(), CommandError>;
    fn upgrade_all(&self, s: &Session) -> Result<(), CommandError>;
    fn autoremove(&self, s: &Session) -> Result<(), CommandError>;

    /// `line` is a complete repository definition in the family's own syntax.
    fn add_repository(&self, s: &Session, name: &str, line: &str) -> Result<(), CommandError>;
    /// Fetches and installs the signing key, adds the repository, refreshes indexes.
    fn add_signed_repository(
        &self,
        s: &Session,
        repo: &SignedRepository,
    ) -> Result<(), CommandError>;

    fn activate_service(&self, s: &Session, name: &str) -> Result<(), CommandError>;
    /// Best effort, a missing service is fine.
    fn disable_service(&self, s: &Session, name: &str) -> Result<(), CommandError>;
    fn restart_service(&self, s: &Session, name: &str) -> Result<(), CommandError>;

    /// Home directory, login shell, admin group, and the username as password. `uid` and
    /// `gid` are pinned so the account lines up with the container's id mapping.
    fn create_admin_user(
        &self,
        s: &Session,
        name: &str,
        uid: u32,
        gid: u32,
    ) -> Result<(), CommandError>;

    fn install_from_url(&self, s: &Session, url: &str) -> Result<(), CommandError>;

    fn basic_packages(&self) -> Vec<&'static str>;
    fn basic_services(&self) -> Vec<&'static str>;

    /// Runs before the basic packages are installed
    fn pre_install_fixes(&self, s: &Session) -> Result<(), CommandError>;
    /// Runs right after the basic packages, before locale and upgrade
    fn post_install_fixes(&self, s: &Session) -> Result<(), CommandError>;
}

/// initial password for throwaway lab accounts: the username itself
fn chpasswd_line(name: &str) -> String {
    format!("{name}:{name}\n")
}

/// Where a downloaded artifact is kept until it has been installed.
fn download_path(url: &str) -> String {
    let file = url
        .split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|f| !f.is_empty())
        .unwrap_or("download");

    format!("/tmp/{file}")
}
