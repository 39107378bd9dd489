use super::Tier;
use crate::{channel::Criticality, guest::SignedRepository};

/// Who owns a persistent directory on the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountOwner {
    /// The host user mapped to the admin account
    Admin,
    Ids { uid: u32, gid: u32 },
}

/// A host directory under the persistent root that survives rebuilds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistentMount {
    /// Device name, and the directory name under `<root>/<container>/`
    pub name: String,
    pub guest_path: String,
    pub owner: MountOwner,
}

impl PersistentMount {
    pub fn admin_home(admin: &str) -> Self {
        Self {
            name: String::from("home"),
            guest_path: format!("/home/{admin}"),
            owner: MountOwner::Admin,
        }
    }
}

/// One machine specific provisioning step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleStep {
    Install(Vec<String>),
    Remove(Vec<String>),
    Repository { name: String, line: String },
    SignedRepository(SignedRepository),
    InstallFromUrl(String),
    ActivateService(String),
    DisableService(String),
    RestartService(String),
    Mount(PersistentMount),
    WriteFile { path: String, contents: String },
    Shell(String, Criticality),
}

impl RoleStep {
    pub fn install(names: &[&str]) -> Self {
        RoleStep::Install(names.iter().map(|n| n.to_string()).collect())
    }

    pub fn remove(names: &[&str]) -> Self {
        RoleStep::Remove(names.iter().map(|n| n.to_string()).collect())
    }

    pub fn needs_admin(&self) -> bool {
        matches!(
            self,
            RoleStep::Mount(PersistentMount {
                owner: MountOwner::Admin,
                ..
            })
        )
    }
}

/// Remote desktop server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteAccess {
    pub packages: Vec<String>,
    pub service: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesktopSpec {
    pub packages: Vec<String>,
    pub remote_access: Option<RemoteAccess>,
}

/// How far a machine goes past the shared basic provisioning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// Stops after basic provisioning
    Basic,
    /// Headless, with its own steps
    Server(Vec<RoleStep>),
    /// Privileged and nested, admin home kept on the host
    Desktop(DesktopSpec, Vec<RoleStep>),
}

impl Role {
    pub fn tier(&self) -> Tier {
        match self {
            Role::Basic => Tier::Basic,
            Role::Server(_) | Role::Desktop(..) => Tier::Role,
        }
    }

    pub fn is_desktop(&self) -> bool {
        matches!(self, Role::Desktop(..))
    }

    pub fn steps(&self) -> &[RoleStep] {
        match self {
            Role::Basic => &[],
            Role::Server(steps) | Role::Desktop(_, steps) => steps,
        }
    }

    pub fn needs_admin(&self) -> bool {
        self.is_desktop() || self.steps().iter().any(RoleStep::needs_admin)
    }
}
