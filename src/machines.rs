//! The machines this host knows how to build.

use lazy_static::lazy_static;

use crate::{
    channel::Criticality,
    guest::{OsFamily, SignedRepository},
    launch::{DesktopSpec, Machine, MountOwner, PersistentMount, RemoteAccess, Role, RoleStep},
};

/// Container root on a stock `root:1000000:1000000000` delegation
const CONTAINER_ROOT: u32 = 1_000_000;

const UNBOUND_STATE: &str = "/var/lib/unbound";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|i| i.to_string()).collect()
}

fn xrdp() -> RemoteAccess {
    RemoteAccess {
        packages: strings(&["xrdp", "xorgxrdp"]),
        service: String::from("xrdp"),
    }
}

lazy_static! {
    static ref MACHINES: Vec<Machine> = vec![
        Machine {
            name: String::from("test"),
            image: String::from("images:debian/12"),
            family: OsFamily::Debian,
            mac: None,
            nested: false,
            wants_admin: false,
            role: Role::Basic,
        },
        Machine {
            name: String::from("alpine"),
            image: String::from("images:alpine/3.20"),
            family: OsFamily::Alpine,
            mac: None,
            nested: false,
            wants_admin: true,
            role: Role::Basic,
        },
        Machine {
            name: String::from("dns"),
            image: String::from("images:alpine/3.20"),
            family: OsFamily::Alpine,
            mac: None,
            nested: false,
            wants_admin: true,
            role: Role::Server(vec![
                RoleStep::install(&["unbound", "drill"]),
                // state only, the package's own config stays visible
                RoleStep::Mount(PersistentMount {
                    name: String::from("unbound"),
                    guest_path: String::from(UNBOUND_STATE),
                    owner: MountOwner::Ids {
                        uid: CONTAINER_ROOT,
                        gid: CONTAINER_ROOT,
                    },
                }),
                RoleStep::WriteFile {
                    path: String::from("/etc/unbound/unbound.conf"),
                    contents: format!(
                        "server:\n\
                         \x20   interface: 0.0.0.0\n\
                         \x20   access-control: 10.0.0.0/8 allow\n\
                         \x20   access-control: 172.16.0.0/12 allow\n\
                         \x20   access-control: 192.168.0.0/16 allow\n\
                         \x20   auto-trust-anchor-file: \"{UNBOUND_STATE}/root.key\"\n"
                    ),
                },
                RoleStep::Shell(
                    format!("unbound-anchor -a {UNBOUND_STATE}/root.key"),
                    Criticality::BestEffort,
                ),
                // the trust anchor is rewritten by the daemon itself
                RoleStep::Shell(
                    format!("chown -R unbound:unbound {UNBOUND_STATE}"),
                    Criticality::Fatal,
                ),
                RoleStep::ActivateService(String::from("unbound")),
            ]),
        },
        Machine {
            name: String::from("dev"),
            image: String::from("ubuntu:24.04"),
            family: OsFamily::Ubuntu,
            mac: Some(String::from("00:16:3e:5d:e7:01")),
            nested: false,
            wants_admin: true,
            role: Role::Desktop(
                DesktopSpec {
                    packages: strings(&["xfce4", "xfce4-goodies", "dbus-x11"]),
                    remote_access: Some(xrdp()),
                },
                vec![
                    RoleStep::SignedRepository(SignedRepository {
                        name: String::from("vscode"),
                        key_url: String::from("https://packages.microsoft.com/keys/microsoft.asc"),
                        repo_url: String::from("https://packages.microsoft.com/repos/code"),
                        suite: Some(String::from("stable")),
                        components: strings(&["main"]),
                    }),
                    RoleStep::install(&["code", "git", "build-essential"]),
                    RoleStep::WriteFile {
                        path: String::from("/etc/xrdp/startwm.sh"),
                        contents: String::from("#!/bin/sh\nexec startxfce4\n"),
                    },
                    // xrdp reads the TLS key from ssl-cert
                    RoleStep::Shell(String::from("adduser xrdp ssl-cert"), Criticality::BestEffort),
                ],
            ),
        },
        Machine {
            name: String::from("lab"),
            image: String::from("images:debian/12"),
            family: OsFamily::Debian,
            mac: None,
            nested: true,
            wants_admin: true,
            role: Role::Desktop(
                DesktopSpec {
                    packages: strings(&["mate-desktop-environment-core", "dbus-x11"]),
                    remote_access: Some(xrdp()),
                },
                vec![
                    RoleStep::install(&["git", "podman"]),
                    RoleStep::DisableService(String::from("apt-daily.timer")),
                ],
            ),
        },
    ];
}

pub fn lookup(name: &str) -> Option<&'static Machine> {
    MACHINES.iter().find(|m| m.name == name)
}

pub fn names() -> Vec<&'static str> {
    MACHINES.iter().map(|m| m.name.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::{lookup, names, MACHINES, UNBOUND_STATE};
    use crate::{
        guest::OsFamily,
        launch::{RoleStep, Tier},
    };
    use itertools::Itertools;

    #[test]
    fn registry() {
        assert_eq!(names(), vec!["test", "alpine", "dns", "dev", "lab"]);
        assert!(names().iter().all_unique());
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn test_machine_is_plain() {
        let test = lookup("test").unwrap();
        assert_eq!(test.family, OsFamily::Debian);
        assert_eq!(test.role.tier(), Tier::Basic);
        assert!(!test.wants_admin);
        assert!(!test.privileged());
    }

    #[test]
    fn desktops() {
        for name in ["dev", "lab"] {
            let machine = lookup(name).unwrap();
            assert!(machine.role.is_desktop(), "{name}");
            assert!(machine.privileged(), "{name}");
            assert!(machine.wants_admin, "{name}");
        }

        assert_eq!(lookup("dev").unwrap().family, OsFamily::Ubuntu);
        assert!(lookup("dev").unwrap().mac.is_some());
    }

    #[test]
    fn mounts_leave_config_alone() {
        for machine in MACHINES.iter() {
            let mounts = machine.role.steps().iter().filter_map(|step| match step {
                RoleStep::Mount(mount) => Some(mount.guest_path.as_str()),
                _ => None,
            });
            for path in mounts {
                assert!(!path.starts_with("/etc"), "{} mounts over {path}", machine.name);
            }
        }
    }

    fn step_index(steps: &[RoleStep], pred: impl Fn(&RoleStep) -> bool) -> usize {
        steps.iter().position(|s| pred(s)).unwrap()
    }

    #[test]
    fn dns_config_lands_after_its_mount() {
        let steps = lookup("dns").unwrap().role.steps();

        let install = step_index(steps, |s| {
            matches!(s, RoleStep::Install(pkgs) if pkgs.iter().any(|p| p == "unbound"))
        });
        let mount = step_index(steps, |s| {
            matches!(s, RoleStep::Mount(m) if m.guest_path == UNBOUND_STATE)
        });
        let config = step_index(steps, |s| {
            matches!(s, RoleStep::WriteFile { path, .. } if path == "/etc/unbound/unbound.conf")
        });
        let start = step_index(steps, |s| {
            matches!(s, RoleStep::ActivateService(name) if name == "unbound")
        });

        assert!(install < mount);
        assert!(mount < config);
        assert!(config < start);

        let RoleStep::WriteFile { contents, .. } = &steps[config] else {
            panic!("not a file");
        };
        assert!(contents.contains("auto-trust-anchor-file: \"/var/lib/unbound/root.key\""));
    }

    #[test]
    fn dns_needs_no_admin() {
        let dns = lookup("dns").unwrap();
        assert_eq!(dns.role.tier(), Tier::Role);
        assert!(!dns.role.needs_admin());
    }
}
