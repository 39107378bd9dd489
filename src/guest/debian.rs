use super::{chpasswd_line, download_path, Guest, OsFamily, SignedRepository};
use crate::{
    channel::{CommandError, Criticality, Session},
    config::Locale,
};

const APT_PREFIX: [&str; 8] = [
    "env",
    "DEBIAN_FRONTEND=noninteractive",
    "apt-get",
    "-y",
    "-o",
    "Dpkg::Options::=--force-confdef",
    "-o",
    "Dpkg::Options::=--force-confold",
];

pub const KEYRING_DIR: &str = "/etc/apt/keyrings";
pub const SOURCES_DIR: &str = "/etc/apt/sources.list.d";

/// apt + systemd
pub struct Debian;

impl Debian {
    /// apt-get, never prompting, keeping local config files on upgrade
    pub(super) fn apt(&self, s: &Session, args: &[&str]) -> Result<(), CommandError> {
        let argv: Vec<&str> = APT_PREFIX.iter().chain(args).copied().collect();
        s.run(&argv, Criticality::Fatal)?;
        Ok(())
    }

    pub(super) fn write_keyboard(&self, s: &Session, locale: &Locale) -> Result<(), CommandError> {
        let keyboard = format!(
            "XKBMODEL=\"{}\"\nXKBLAYOUT=\"{}\"\nXKBVARIANT=\"\"\nXKBOPTIONS=\"\"\nBACKSPACE=\"guess\"\n",
            locale.keyboard_model, locale.keyboard_layout
        );
        s.write_file("/etc/default/keyboard", keyboard.as_bytes())
    }

    pub(super) fn update_locale(&self, s: &Session, locale: &Locale) -> Result<(), CommandError> {
        s.run(
            &["update-locale", &format!("LANG={}", locale.locale_name())],
            Criticality::Fatal,
        )?;
        Ok(())
    }

    fn codename(&self, s: &Session) -> Result<String, CommandError> {
        let script = ". /etc/os-release && echo \"$VERSION_CODENAME\"";
        let out = s.capture(&["sh", "-c", script])?;
        let codename = String::from_utf8_lossy(&out).trim().to_string();

        if codename.is_empty() {
            return Err(CommandError::Output {
                command: script.to_string(),
                reason: String::from("no VERSION_CODENAME in /etc/os-release"),
            });
        }

        Ok(codename)
    }
}

impl Guest for Debian {
    fn family(&self) -> OsFamily {
        OsFamily::Debian
    }

    fn set_locale(&self, s: &Session, locale: &Locale) -> Result<(), CommandError> {
        // debian's locale-gen ignores arguments and only builds what locale.gen lists
        let gen = format!("{} UTF-8\n", locale.locale_name());
        s.write_file("/etc/locale.gen", gen.as_bytes())?;
        s.run(&["locale-gen"], Criticality::Fatal)?;
        self.update_locale(s, locale)?;
        self.write_keyboard(s, locale)
    }

    fn set_timezone(&self, s: &Session, zone: &str) -> Result<(), CommandError> {
        s.write_file("/etc/timezone", format!("{zone}\n").as_bytes())?;
        s.run(
            &["ln", "-sf", &format!("/usr/share/zoneinfo/{zone}"), "/etc/localtime"],
            Criticality::Fatal,
        )?;
        s.run(
            &[
                "env",
                "DEBIAN_FRONTEND=noninteractive",
                "dpkg-reconfigure",
                "-f",
                "noninteractive",
                "tzdata",
            ],
            Criticality::Fatal,
        )?;
        Ok(())
    }

    fn install_packages(&self, s: &Session, names: &[&str]) -> Result<(), CommandError> {
        if names.is_empty() {
            return Ok(());
        }

        let mut args = vec!["install"];
        args.extend(names);
        self.apt(s, &args)
    }

    fn remove_packages(&self, s: &Session, names: &[&str]) -> Result<(), CommandError> {
        if names.is_empty() {
            return Ok(());
        }

        let mut args = vec!["remove", "--purge"];
        args.extend(names);
        self.apt(s, &args)
    }

    fn upgrade_all(&self, s: &Session) -> Result<(), CommandError> {
        self.apt(s, &["update"])?;
        self.apt(s, &["dist-upgrade"])
    }

    fn autoremove(&self, s: &Session) -> Result<(), CommandError> {
        self.apt(s, &["autoremove", "--purge"])
    }

    fn add_repository(&self, s: &Session, name: &str, line: &str) -> Result<(), CommandError> {
        s.write_file(
            &format!("{SOURCES_DIR}/{name}.list"),
            format!("{line}\n").as_bytes(),
        )?;
        self.apt(s, &["update"])
    }

    fn add_signed_repository(
        &self,
        s: &Session,
        repo: &SignedRepository,
    ) -> Result<(), CommandError> {
        let armored = s.capture(&["curl", "-fsSL", &repo.key_url])?;
        let keyring = s.pipe_capture(&["gpg", "--dearmor"], &armored)?;
        let keyring_path = format!("{KEYRING_DIR}/{}.gpg", repo.name);
        s.write_file(&keyring_path, &keyring)?;

        let suite = match &repo.suite {
            Some(suite) => suite.clone(),
            None => self.codename(s)?,
        };

        let line = format!(
            "deb [signed-by={keyring_path}] {} {suite} {}",
            repo.repo_url,
            repo.components.join(" ")
        );
        self.add_repository(s, &repo.name, &line)
    }

    fn activate_service(&self, s: &Session, name: &str) -> Result<(), CommandError> {
        s.run(&["systemctl", "enable", "--now", name], Criticality::Fatal)?;
        Ok(())
    }

    fn disable_service(&self, s: &Session, name: &str) -> Result<(), CommandError> {
        s.run(
            &["systemctl", "disable", "--now", name],
            Criticality::BestEffort,
        )?;
        Ok(())
    }

    fn restart_service(&self, s: &Session, name: &str) -> Result<(), CommandError> {
        s.run(&["systemctl", "restart", name], Criticality::Fatal)?;
        Ok(())
    }

    fn create_admin_user(
        &self,
        s: &Session,
        name: &str,
        uid: u32,
        gid: u32,
    ) -> Result<(), CommandError> {
        let (uid, gid) = (uid.to_string(), gid.to_string());
        s.run(&["groupadd", "--gid", &gid, name], Criticality::Fatal)?;
        s.run(
            &[
                "useradd",
                "--create-home",
                "--shell",
                "/bin/bash",
                "--uid",
                &uid,
                "--gid",
                &gid,
                "--groups",
                "sudo",
                name,
            ],
            Criticality::Fatal,
        )?;
        s.pipe(&["chpasswd"], chpasswd_line(name).as_bytes(), Criticality::Fatal)?;
        Ok(())
    }

    fn install_from_url(&self, s: &Session, url: &str) -> Result<(), CommandError> {
        let path = download_path(url);
        s.run(&["curl", "-fsSL", "-o", &path, url], Criticality::Fatal)?;
        // a path makes apt-get resolve the file's dependencies from the repositories
        self.apt(s, &["install", &path])?;
        s.run(&["rm", "-f", &path], Criticality::BestEffort)?;
        Ok(())
    }

    fn basic_packages(&self) -> Vec<&'static str> {
        vec![
            "sudo",
            "locales",
            "tzdata",
            "keyboard-configuration",
            "openssh-server",
            "curl",
            "ca-certificates",
            "gnupg",
            "bash-completion",
            "less",
        ]
    }

    fn basic_services(&self) -> Vec<&'static str> {
        vec!["ssh"]
    }

    fn pre_install_fixes(&self, s: &Session) -> Result<(), CommandError> {
        // fresh images ship without package indexes
        self.apt(s, &["update"])
    }

    fn post_install_fixes(&self, _s: &Session) -> Result<(), CommandError> {
        Ok(())
    }
}
