use tracing::debug;

use super::{chpasswd_line, download_path, Guest, OsFamily, SignedRepository};
use crate::{
    channel::{CommandError, Criticality, Session},
    config::Locale,
};

pub const REPOSITORIES: &str = "/etc/apk/repositories";

/// apk + OpenRC
pub struct Alpine;

impl Alpine {
    fn apk(&self, s: &Session, args: &[&str]) -> Result<(), CommandError> {
        let argv: Vec<&str> = ["apk"].iter().chain(args).copied().collect();
        s.run(&argv, Criticality::Fatal)?;
        Ok(())
    }
}

impl Guest for Alpine {
    fn family(&self) -> OsFamily {
        OsFamily::Alpine
    }

    fn set_locale(&self, s: &Session, locale: &Locale) -> Result<(), CommandError> {
        let name = locale.locale_name();
        let profile = format!("export LANG={name}\nexport LC_COLLATE=C\n");
        s.write_file("/etc/profile.d/20locale.sh", profile.as_bytes())?;

        // console keymaps have no notion of a keyboard model
        debug!("ignoring keyboard model {}", locale.keyboard_model);
        s.run(
            &[
                "setup-keymap",
                &locale.keyboard_layout,
                &locale.keyboard_layout,
            ],
            Criticality::BestEffort,
        )?;
        Ok(())
    }

    fn set_timezone(&self, s: &Session, zone: &str) -> Result<(), CommandError> {
        s.run(
            &["ln", "-sf", &format!("/usr/share/zoneinfo/{zone}"), "/etc/localtime"],
            Criticality::Fatal,
        )?;
        s.write_file("/etc/timezone", format!("{zone}\n").as_bytes())
    }

    fn install_packages(&self, s: &Session, names: &[&str]) -> Result<(), CommandError> {
        if names.is_empty() {
            return Ok(());
        }

        let mut args = vec!["add"];
        args.extend(names);
        self.apk(s, &args)
    }

    fn remove_packages(&self, s: &Session, names: &[&str]) -> Result<(), CommandError> {
        if names.is_empty() {
            return Ok(());
        }

        let mut args = vec!["del"];
        args.extend(names);
        self.apk(s, &args)
    }

    fn upgrade_all(&self, s: &Session) -> Result<(), CommandError> {
        self.apk(s, &["update"])?;
        self.apk(s, &["upgrade", "--available"])
    }

    fn autoremove(&self, s: &Session) -> Result<(), CommandError> {
        // apk drops orphans on `del` already, all that's left is the cache (if one is set up)
        s.run(&["apk", "cache", "clean"], Criticality::BestEffort)?;
        Ok(())
    }

    fn add_repository(&self, s: &Session, name: &str, line: &str) -> Result<(), CommandError> {
        debug!("adding repository {}", name);
        // the line goes in as $1, never spliced into the script
        let script =
            format!("grep -qxF -- \"$1\" {REPOSITORIES} || printf '%s\\n' \"$1\" >> {REPOSITORIES}");
        s.run(&["sh", "-c", &script, "sh", line], Criticality::Fatal)?;
        self.apk(s, &["update"])
    }

    fn add_signed_repository(
        &self,
        s: &Session,
        repo: &SignedRepository,
    ) -> Result<(), CommandError> {
        // apk takes the public key as is
        let key = s.capture(&["curl", "-fsSL", &repo.key_url])?;
        s.write_file(&format!("/etc/apk/keys/{}.rsa.pub", repo.name), &key)?;

        let mut parts = vec![repo.repo_url.trim_end_matches('/')];
        parts.extend(repo.suite.as_deref());
        parts.extend(repo.components.iter().map(String::as_str));
        self.add_repository(s, &repo.name, &parts.join("/"))
    }

    fn activate_service(&self, s: &Session, name: &str) -> Result<(), CommandError> {
        s.run(&["rc-update", "add", name, "default"], Criticality::Fatal)?;
        s.run(&["rc-service", name, "start"], Criticality::Fatal)?;
        Ok(())
    }

    fn disable_service(&self, s: &Session, name: &str) -> Result<(), CommandError> {
        s.run(&["rc-service", name, "stop"], Criticality::BestEffort)?;
        s.run(&["rc-update", "del", name, "default"], Criticality::BestEffort)?;
        Ok(())
    }

    fn restart_service(&self, s: &Session, name: &str) -> Result<(), CommandError> {
        s.run(&["rc-service", name, "restart"], Criticality::Fatal)?;
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
        s.run(&["addgroup", "-g", &gid, name], Criticality::Fatal)?;
        // bash isn't there yet, the basic packages come after the user
        s.run(
            &["adduser", "-D", "-s", "/bin/ash", "-u", &uid, "-G", name, name],
            Criticality::Fatal,
        )?;
        s.pipe(&["chpasswd"], chpasswd_line(name).as_bytes(), Criticality::Fatal)?;
        s.run(&["addgroup", name, "wheel"], Criticality::Fatal)?;
        Ok(())
    }

    fn install_from_url(&self, s: &Session, url: &str) -> Result<(), CommandError> {
        let path = download_path(url);
        s.run(&["curl", "-fsSL", "-o", &path, url], Criticality::Fatal)?;
        self.apk(s, &["add", "--allow-untrusted", &path])?;
        s.run(&["rm", "-f", &path], Criticality::BestEffort)?;
        Ok(())
    }

    fn basic_packages(&self) -> Vec<&'static str> {
        vec![
            "bash",
            "sudo",
            "openssh",
            "tzdata",
            "curl",
            "ca-certificates",
            "musl-locales",
            "less",
        ]
    }

    fn basic_services(&self) -> Vec<&'static str> {
        vec!["sshd"]
    }

    fn pre_install_fixes(&self, s: &Session) -> Result<(), CommandError> {
        // images ship with community commented out
        s.run(
            &["sed", "-i", r"s|^#\(.*/community\)$|\1|", REPOSITORIES],
            Criticality::Fatal,
        )?;
        self.apk(s, &["update"])
    }

    fn post_install_fixes(&self, s: &Session) -> Result<(), CommandError> {
        // sudo exists now, let wheel use it
        s.write_file("/etc/sudoers.d/wheel", b"%wheel ALL=(ALL:ALL) ALL\n")
    }
}

#[cfg(test)]
mod tests {
    use super::Alpine;
    use crate::{
        channel::Session,
        guest::{Guest, SignedRepository},
        testing::{Call, Fake},
    };

    const REPO_SCRIPT: &str = r#"grep -qxF -- "$1" /etc/apk/repositories || printf '%s\n' "$1" >> /etc/apk/repositories"#;

    #[test]
    fn admin_user_joins_wheel() {
        let fake = Fake::new();
        Alpine
            .create_admin_user(&Session::new(&fake, "box"), "alice", 1500, 1501)
            .unwrap();

        assert_eq!(
            fake.calls(),
            vec![
                Call::exec(&["addgroup", "-g", "1501", "alice"]),
                Call::exec(&[
                    "adduser", "-D", "-s", "/bin/ash", "-u", "1500", "-G", "alice", "alice"
                ]),
                Call::pipe(&["chpasswd"], "alice:alice\n"),
                Call::exec(&["addgroup", "alice", "wheel"]),
            ]
        );
    }

    #[test]
    fn services_use_openrc() {
        let fake = Fake::new();
        let s = Session::new(&fake, "box");
        Alpine.activate_service(&s, "unbound").unwrap();
        Alpine.restart_service(&s, "unbound").unwrap();

        assert_eq!(
            fake.calls(),
            vec![
                Call::exec(&["rc-update", "add", "unbound", "default"]),
                Call::exec(&["rc-service", "unbound", "start"]),
                Call::exec(&["rc-service", "unbound", "restart"]),
            ]
        );
    }

    #[test]
    fn disable_is_best_effort() {
        let fake = Fake::new();
        fake.fail_when("rc-service");
        fake.fail_when("rc-update");

        Alpine
            .disable_service(&Session::new(&fake, "box"), "chronyd")
            .unwrap();
        assert_eq!(fake.calls().len(), 2);
    }

    #[test]
    fn signed_repository_line() {
        let fake = Fake::new();
        fake.respond("curl", b"KEY");

        let repo = SignedRepository {
            name: String::from("edge-testing"),
            key_url: String::from("https://example.com/key.rsa.pub"),
            repo_url: String::from("https://example.com/alpine/"),
            suite: Some(String::from("edge")),
            components: vec![String::from("testing")],
        };
        Alpine
            .add_signed_repository(&Session::new(&fake, "box"), &repo)
            .unwrap();

        let calls = fake.calls();
        assert_eq!(
            calls[1],
            Call::write("/etc/apk/keys/edge-testing.rsa.pub", "KEY")
        );
        assert_eq!(
            calls[2],
            Call::exec(&[
                "sh",
                "-c",
                REPO_SCRIPT,
                "sh",
                "https://example.com/alpine/edge/testing"
            ])
        );
        assert_eq!(calls[3], Call::exec(&["apk", "update"]));
    }

    #[test]
    fn repository_line_is_an_argument() {
        let fake = Fake::new();
        let line = "https://example.com/it's'; rm -rf /'";
        Alpine
            .add_repository(&Session::new(&fake, "box"), "odd", line)
            .unwrap();

        assert_eq!(
            fake.calls()[0],
            Call::exec(&["sh", "-c", REPO_SCRIPT, "sh", line])
        );
    }
}
