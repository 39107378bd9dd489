use lazy_static::lazy_static;
use regex::Regex;
use std::{path::Path, time::Instant};
use tracing::{debug, info};

use super::{
    LaunchError, LaunchPlan, LaunchState, MountOwner, Phase, PhaseError, PersistentMount,
    PreconditionError, Role, RoleStep,
};
use crate::{
    channel::{Channel, Session},
    config::LaunchConfig,
    guest::{Guest, OsFamily},
    host::{Destroyed, Device, Host},
    idmap::{parse_subids, resolve_user, IdentityMapError, IdentityMapping, ValidatedMapping},
    network::{NetworkPoller, Sleeper},
};

lazy_static! {
    static ref MAC: Regex = Regex::new(r"^[0-9a-fA-F]{2}(:[0-9a-fA-F]{2}){5}$").unwrap();
}

/// A named container definition.
#[derive(Clone, Debug)]
pub struct Machine {
    pub name: String,
    pub image: String,
    pub family: OsFamily,
    /// `None` lets the container tool pick one
    pub mac: Option<String>,
    /// Runs containers of its own, so needs privileged + nesting
    pub nested: bool,
    /// Gets the configured admin user (and its id mapping)
    pub wants_admin: bool,
    pub role: Role,
}

impl Machine {
    /// desktops always run privileged and nested
    pub fn privileged(&self) -> bool {
        self.nested || self.role.is_desktop()
    }
}

/// Fixed for the lifetime of one launch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerIdentity {
    pub name: String,
    pub image: String,
    pub mac: Option<String>,
    pub bridge: Option<String>,
}

/// The admin account, resolved and validated before anything is destroyed.
#[derive(Clone, Debug)]
struct Admin {
    name: String,
    mapping: ValidatedMapping,
}

#[derive(Clone, Debug, Default)]
struct Preflight {
    admin: Option<Admin>,
}

pub struct Launcher<'a, H> {
    host: &'a H,
    config: &'a LaunchConfig,
    sleeper: &'a dyn Sleeper,
    machine: &'a Machine,
    identity: ContainerIdentity,
    guest: Box<dyn Guest>,
}

impl<'a, H: Host + Channel> Launcher<'a, H> {
    pub fn new(
        host: &'a H,
        config: &'a LaunchConfig,
        sleeper: &'a dyn Sleeper,
        machine: &'a Machine,
    ) -> Self {
        let identity = ContainerIdentity {
            name: machine.name.clone(),
            image: machine.image.clone(),
            mac: machine.mac.clone(),
            bridge: config.bridge.clone(),
        };

        Self {
            host,
            config,
            sleeper,
            machine,
            identity,
            guest: machine.family.guest(),
        }
    }

    pub fn identity(&self) -> &ContainerIdentity {
        &self.identity
    }

    pub fn plan(&self) -> LaunchPlan {
        LaunchPlan::for_role(&self.machine.role)
    }

    /// Pre-flight checks, then every phase of the plan. Nothing is touched if the
    /// checks fail.
    pub fn launch(&self) -> Result<LaunchState, LaunchError> {
        let preflight = self.preflight()?;
        self.run_plan(&self.plan(), &preflight)
    }

    fn run_plan(&self, plan: &LaunchPlan, preflight: &Preflight) -> Result<LaunchState, LaunchError> {
        let name = &self.identity.name;
        let mut state = None;

        for &phase in plan.phases() {
            if !phase.can_follow(state) {
                return Err(LaunchError::OutOfOrder { phase, state });
            }

            info!("{}: {} ({} tier)", name, phase, phase.tier());
            let started = Instant::now();

            self.run_phase(phase, preflight)
                .map_err(|source| LaunchError::Phase { phase, source })?;

            state = Some(phase.target());
            debug!("{}: {} in {:?}", name, phase.target(), started.elapsed());
        }

        // an empty plan never touched the container
        Ok(state.unwrap_or(LaunchState::Absent))
    }

    fn read_host(&self, path: &Path) -> Result<String, IdentityMapError> {
        self.host
            .read_host_file(path)
            .map_err(|source| IdentityMapError::Read {
                path: path.to_path_buf(),
                source,
            })
    }

    fn preflight(&self) -> Result<Preflight, PreconditionError> {
        if let Some(mac) = &self.identity.mac {
            if !MAC.is_match(mac) {
                return Err(PreconditionError::InvalidMac(mac.clone()));
            }
        }

        let role = &self.machine.role;
        if !(self.machine.wants_admin || role.needs_admin()) {
            return Ok(Preflight::default());
        }

        let name = match &self.config.admin_user {
            Some(name) => name.clone(),
            None if role.needs_admin() => {
                return Err(PreconditionError::AdminRequired(self.machine.name.clone()))
            }
            None => {
                info!("{}: no admin user configured", self.machine.name);
                return Ok(Preflight::default());
            }
        };

        let user = resolve_user(&self.read_host(&self.config.passwd_path)?, &name)?;
        let subuid = parse_subids("subuid", &self.read_host(&self.config.subuid_path)?)?;
        let subgid = parse_subids("subgid", &self.read_host(&self.config.subgid_path)?)?;

        let mapping = IdentityMapping::for_user(&user, self.config.guest_uid, self.config.guest_gid)
            .validate(&subuid, &subgid)?;
        info!(
            "{}: mapping host {}:{} to guest {}:{}",
            self.machine.name,
            mapping.mapping().host_uid,
            mapping.mapping().host_gid,
            mapping.mapping().guest_uid,
            mapping.mapping().guest_gid
        );

        Ok(Preflight {
            admin: Some(Admin { name, mapping }),
        })
    }

    fn run_phase(&self, phase: Phase, preflight: &Preflight) -> Result<(), PhaseError> {
        let name = self.identity.name.as_str();
        let admin = preflight.admin.as_ref();

        match phase {
            Phase::Destroy => match self.host.destroy(name)? {
                Destroyed::Removed => info!("{}: removed previous container", name),
                Destroyed::AlreadyAbsent => debug!("{}: nothing to remove", name),
            },
            Phase::Init => self.host.init(&self.identity.image, name)?,
            Phase::Configure => self.configure(admin)?,
            Phase::Start => {
                self.sleeper.sleep(self.config.start_settle);
                self.host.start(name)?;
            }
            Phase::WaitNetwork => {
                NetworkPoller::from_config(self.config).wait(&self.session(), self.sleeper)?;
            }
            Phase::Basic => self.provision_basic(admin)?,
            Phase::Role => self.provision_role(admin)?,
        }

        Ok(())
    }

    fn session(&self) -> Session<'_> {
        Session::new(self.host, &self.identity.name)
    }

    fn configure(&self, admin: Option<&Admin>) -> Result<(), PhaseError> {
        let name = self.identity.name.as_str();

        if self.machine.privileged() {
            self.host.set_config(name, "security.privileged", "true")?;
            self.host.set_config(name, "security.nesting", "true")?;
        }

        if let Some(mac) = &self.identity.mac {
            self.host.set_config(name, "volatile.eth0.hwaddr", mac)?;
        }

        if let Some(bridge) = &self.identity.bridge {
            self.host.add_device(
                name,
                "eth0",
                &Device::Nic {
                    parent: bridge.clone(),
                },
            )?;
        }

        if let Some(admin) = admin {
            self.host
                .set_config(name, "raw.idmap", &admin.mapping.raw_idmap())?;
        }

        Ok(())
    }

    fn provision_basic(&self, admin: Option<&Admin>) -> Result<(), PhaseError> {
        let s = self.session();
        let guest = &self.guest;

        if let Some(admin) = admin {
            let ids = admin.mapping.mapping();
            guest.create_admin_user(&s, &admin.name, ids.guest_uid, ids.guest_gid)?;
        }

        guest.pre_install_fixes(&s)?;
        guest.install_packages(&s, &guest.basic_packages())?;
        for service in guest.basic_services() {
            guest.activate_service(&s, service)?;
        }
        guest.post_install_fixes(&s)?;

        guest.set_locale(&s, &self.config.locale)?;
        guest.set_timezone(&s, &self.config.timezone)?;

        guest.upgrade_all(&s)?;
        guest.autoremove(&s)?;
        Ok(())
    }

    fn provision_role(&self, admin: Option<&Admin>) -> Result<(), PhaseError> {
        let s = self.session();
        let role = &self.machine.role;

        if let Role::Desktop(desktop, _) = role {
            let admin = admin.ok_or_else(|| PhaseError::NoAdmin(String::from("home")))?;
            self.mount(&PersistentMount::admin_home(&admin.name), Some(admin))?;
            self.guest.install_packages(&s, &as_strs(&desktop.packages))?;
        }

        for step in role.steps() {
            self.run_step(&s, step, admin)?;
        }

        if let Role::Desktop(desktop, _) = role {
            if let Some(remote) = &desktop.remote_access {
                self.guest.install_packages(&s, &as_strs(&remote.packages))?;
                self.guest.activate_service(&s, &remote.service)?;
            }
        }

        Ok(())
    }

    fn run_step(
        &self,
        s: &Session,
        step: &RoleStep,
        admin: Option<&Admin>,
    ) -> Result<(), PhaseError> {
        let guest = &self.guest;

        match step {
            RoleStep::Install(names) => guest.install_packages(s, &as_strs(names))?,
            RoleStep::Remove(names) => guest.remove_packages(s, &as_strs(names))?,
            RoleStep::Repository { name, line } => guest.add_repository(s, name, line)?,
            RoleStep::SignedRepository(repo) => guest.add_signed_repository(s, repo)?,
            RoleStep::InstallFromUrl(url) => guest.install_from_url(s, url)?,
            RoleStep::ActivateService(name) => guest.activate_service(s, name)?,
            RoleStep::DisableService(name) => guest.disable_service(s, name)?,
            RoleStep::RestartService(name) => guest.restart_service(s, name)?,
            RoleStep::Mount(mount) => self.mount(mount, admin)?,
            RoleStep::WriteFile { path, contents } => s.write_file(path, contents.as_bytes())?,
            RoleStep::Shell(script, criticality) => {
                s.run_shell(script, *criticality)?;
            }
        }

        Ok(())
    }

    /// Hands the host directory to its owner, then attaches it.
    fn mount(&self, mount: &PersistentMount, admin: Option<&Admin>) -> Result<(), PhaseError> {
        let (uid, gid) = match mount.owner {
            MountOwner::Admin => {
                let admin = admin.ok_or_else(|| PhaseError::NoAdmin(mount.name.clone()))?;
                let m = admin.mapping.mapping();
                (m.host_uid, m.host_gid)
            }
            MountOwner::Ids { uid, gid } => (uid, gid),
        };

        let source = self
            .config
            .persistent_dir(&self.identity.name, &mount.name);
        self.host
            .prepare_host_dir(&source, uid, gid)
            .map_err(|e| PhaseError::HostDir {
                path: source.clone(),
                source: e,
            })?;

        let path = match (mount.guest_path.strip_prefix('~'), admin) {
            (Some(rest), Some(admin)) => format!("/home/{}{}", admin.name, rest),
            _ => mount.guest_path.clone(),
        };

        info!(
            "{}: mounting {} at {}",
            self.identity.name,
            source.display(),
            path
        );
        self.host
            .add_device(&self.identity.name, &mount.name, &Device::Disk { source, path })?;
        Ok(())
    }
}

fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}
