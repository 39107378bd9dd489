//! Destroy-and-rebuild of one container.
//!
//! ```text
//! (anything) --Destroy--> Absent --Init--> Initialized --Configure--> Configured
//!   --Start--> Running --WaitNetwork--> NetworkReady --Basic--> BasicProvisioned
//!   --Role--> RoleProvisioned
//! ```
//!
//! Phases always run in this order and none is skipped. A machine only decides how far
//! the plan goes: basic machines stop at `BasicProvisioned`.

pub mod launcher;
pub mod role;

pub use launcher::{Launcher, Machine};
pub use role::{DesktopSpec, MountOwner, PersistentMount, RemoteAccess, Role, RoleStep};

use std::path::PathBuf;
use strum::IntoEnumIterator;

use crate::{channel::CommandError, idmap::IdentityMapError, network::NetworkError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum LaunchState {
    Absent,
    Initialized,
    Configured,
    Running,
    NetworkReady,
    BasicProvisioned,
    RoleProvisioned,
}

/// Minimal covers everything up to a reachable guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum Tier {
    Minimal,
    Basic,
    Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    Destroy,
    Init,
    Configure,
    Start,
    WaitNetwork,
    Basic,
    Role,
}

impl Phase {
    /// State the container must be in first. Destroy takes whatever is there.
    pub fn requires(self) -> Option<LaunchState> {
        match self {
            Phase::Destroy => None,
            Phase::Init => Some(LaunchState::Absent),
            Phase::Configure => Some(LaunchState::Initialized),
            Phase::Start => Some(LaunchState::Configured),
            Phase::WaitNetwork => Some(LaunchState::Running),
            Phase::Basic => Some(LaunchState::NetworkReady),
            Phase::Role => Some(LaunchState::BasicProvisioned),
        }
    }

    pub fn target(self) -> LaunchState {
        match self {
            Phase::Destroy => LaunchState::Absent,
            Phase::Init => LaunchState::Initialized,
            Phase::Configure => LaunchState::Configured,
            Phase::Start => LaunchState::Running,
            Phase::WaitNetwork => LaunchState::NetworkReady,
            Phase::Basic => LaunchState::BasicProvisioned,
            Phase::Role => LaunchState::RoleProvisioned,
        }
    }

    pub fn tier(self) -> Tier {
        match self {
            Phase::Basic => Tier::Basic,
            Phase::Role => Tier::Role,
            _ => Tier::Minimal,
        }
    }

    /// Whether the phase may follow `state` (`None`: nothing known yet)
    pub fn can_follow(self, state: Option<LaunchState>) -> bool {
        match self.requires() {
            None => true,
            required => required == state,
        }
    }
}

/// The phases one launch goes through, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchPlan {
    phases: Vec<Phase>,
}

impl LaunchPlan {
    /// Everything up to and including `top`: role implies basic implies minimal.
    pub fn up_to(top: Tier) -> Self {
        Self {
            phases: Phase::iter().filter(|p| p.tier() <= top).collect(),
        }
    }

    pub fn for_role(role: &Role) -> Self {
        Self::up_to(role.tier())
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn terminal(&self) -> Option<LaunchState> {
        self.phases.last().map(|p| p.target())
    }

    #[cfg(test)]
    pub(crate) fn custom(phases: Vec<Phase>) -> Self {
        Self { phases }
    }
}

/// Found before anything was touched.
#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    #[error("identity mapping")]
    IdentityMap(#[from] IdentityMapError),
    #[error("`{0}` is not a MAC address")]
    InvalidMac(String),
    #[error("{0} needs an admin user, pass --admin")]
    AdminRequired(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("preparing {} on the host", path.display())]
    HostDir {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("mount {0} belongs to the admin user, and there is none")]
    NoAdmin(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("pre-flight check failed, container left untouched")]
    Precondition(#[from] PreconditionError),
    #[error("phase {phase} failed")]
    Phase {
        phase: Phase,
        #[source]
        source: PhaseError,
    },
    #[error("phase {phase} cannot follow {state:?}")]
    OutOfOrder {
        phase: Phase,
        state: Option<LaunchState>,
    },
}

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_PRECONDITION: i32 = 3;

impl LaunchError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, LaunchError::Precondition(_))
    }

    /// The container tool's own exit code when a command failed, otherwise a fixed one.
    pub fn exit_code(&self) -> i32 {
        let command = match self {
            LaunchError::Precondition(_) => return EXIT_PRECONDITION,
            LaunchError::Phase {
                source: PhaseError::Command(e),
                ..
            }
            | LaunchError::Phase {
                source: PhaseError::Network(NetworkError::Command(e)),
                ..
            } => e,
            _ => return EXIT_FAILURE,
        };

        match command.code() {
            Some(code) if code != 0 => code,
            _ => EXIT_FAILURE,
        }
    }
}
