use super::{Debian, Guest, OsFamily, SignedRepository};
use crate::{
    channel::{CommandError, Criticality, Session},
    config::Locale,
};

/// The user ubuntu cloud images come with
pub const VENDOR_USER: &str = "ubuntu";

/// snapd never finishes installing inside a container
pub const BLOCKED_PACKAGE: &str = "snapd";

/// Gets wedged while the image upgrades itself, purging resets it
pub const REINSTALLED_PACKAGE: &str = "unattended-upgrades";

/// Debian with Ubuntu's quirks: everything not overridden here goes to the wrapped
/// Debian guest.
pub struct Ubuntu {
    base: Debian,
}

impl Ubuntu {
    pub fn new(base: Debian) -> Self {
        Self { base }
    }
}

impl Guest for Ubuntu {
    fn family(&self) -> OsFamily {
        OsFamily::Ubuntu
    }

    fn set_locale(&self, s: &Session, locale: &Locale) -> Result<(), CommandError> {
        // ubuntu generates whatever it is asked for, locale.gen isn't used
        s.run(&["locale-gen", &locale.locale_name()], Criticality::Fatal)?;
        self.base.update_locale(s, locale)?;
        self.base.write_keyboard(s, locale)
    }

    fn set_timezone(&self, s: &Session, zone: &str) -> Result<(), CommandError> {
        self.base.set_timezone(s, zone)
    }

    fn install_packages(&self, s: &Session, names: &[&str]) -> Result<(), CommandError> {
        self.base.install_packages(s, names)
    }

    fn remove_packages(&self, s: &Session, names: &[&str]) -> Result<(), CommandError> {
        self.base.remove_packages(s, names)
    }

    fn upgrade_all(&self, s: &Session) -> Result<(), CommandError> {
        self.base.upgrade_all(s)
    }

    fn autoremove(&self, s: &Session) -> Result<(), CommandError> {
        self.base.autoremove(s)
    }

    fn add_repository(&self, s: &Session, name: &str, line: &str) -> Result<(), CommandError> {
        self.base.add_repository(s, name, line)
    }

    fn add_signed_repository(
        &self,
        s: &Session,
        repo: &SignedRepository,
    ) -> Result<(), CommandError> {
        self.base.add_signed_repository(s, repo)
    }

    fn activate_service(&self, s: &Session, name: &str) -> Result<(), CommandError> {
        self.base.activate_service(s, name)
    }

    fn disable_service(&self, s: &Session, name: &str) -> Result<(), CommandError> {
        self.base.disable_service(s, name)
    }

    fn restart_service(&self, s: &Session, name: &str) -> Result<(), CommandError> {
        self.base.restart_service(s, name)
    }

    fn create_admin_user(
        &self,
        s: &Session,
        name: &str,
        uid: u32,
        gid: u32,
    ) -> Result<(), CommandError> {
        // the vendor user and its group hold 1000, which the mapped admin usually needs
        s.run(
            &["userdel", "--remove", VENDOR_USER],
            Criticality::BestEffort,
        )?;
        self.base.create_admin_user(s, name, uid, gid)
    }

    fn install_from_url(&self, s: &Session, url: &str) -> Result<(), CommandError> {
        self.base.install_from_url(s, url)
    }

    fn basic_packages(&self) -> Vec<&'static str> {
        let mut packages = self.base.basic_packages();
        packages.push("software-properties-common");
        packages
    }

    fn basic_services(&self) -> Vec<&'static str> {
        self.base.basic_services()
    }

    fn pre_install_fixes(&self, s: &Session) -> Result<(), CommandError> {
        let pin = format!("Package: {BLOCKED_PACKAGE}\nPin: release a=*\nPin-Priority: -10\n");
        s.write_file(
            &format!("/etc/apt/preferences.d/no-{BLOCKED_PACKAGE}.pref"),
            pin.as_bytes(),
        )?;
        self.base.pre_install_fixes(s)
    }

    fn post_install_fixes(&self, s: &Session) -> Result<(), CommandError> {
        self.base.post_install_fixes(s)?;

        s.run(
            &[
                "env",
                "DEBIAN_FRONTEND=noninteractive",
                "apt-get",
                "-y",
                "purge",
                REINSTALLED_PACKAGE,
            ],
            Criticality::BestEffort,
        )?;
        self.base.install_packages(s, &[REINSTALLED_PACKAGE])
    }
}

#[cfg(test)]
mod tests {
    use super::Ubuntu;
    use crate::{
        channel::Session,
        guest::{Debian, Guest},
        testing::{Call, Fake},
    };

    #[test]
    fn removes_vendor_user_first() {
        let ubuntu_fake = Fake::new();
        Ubuntu::new(Debian)
            .create_admin_user(&Session::new(&ubuntu_fake, "box"), "alice", 1000, 1000)
            .unwrap();

        let debian_fake = Fake::new();
        Debian
            .create_admin_user(&Session::new(&debian_fake, "box"), "alice", 1000, 1000)
            .unwrap();

        let ubuntu_calls = ubuntu_fake.calls();
        assert_eq!(
            ubuntu_calls[0],
            Call::exec(&["userdel", "--remove", "ubuntu"])
        );
        // the rest is exactly what debian does
        assert_eq!(ubuntu_calls[1..], debian_fake.calls()[..]);

        assert!(!debian_fake
            .calls()
            .iter()
            .any(|c| c.rendered().starts_with("userdel")));
    }

    #[test]
    fn missing_vendor_user_is_fine() {
        let fake = Fake::new();
        fake.fail_when("userdel");

        Ubuntu::new(Debian)
            .create_admin_user(&Session::new(&fake, "box"), "alice", 1000, 1000)
            .unwrap();
        assert_eq!(fake.calls().len(), 4);
    }

    #[test]
    fn snapd_is_pinned_before_indexes_are_fetched() {
        let fake = Fake::new();
        Ubuntu::new(Debian)
            .pre_install_fixes(&Session::new(&fake, "box"))
            .unwrap();

        let calls = fake.calls();
        assert!(matches!(
            &calls[0],
            Call::Write { path, contents }
                if path == "/etc/apt/preferences.d/no-snapd.pref"
                    && contents.contains("Pin-Priority: -10")
        ));
        assert!(calls[1].rendered().ends_with("apt-get -y -o Dpkg::Options::=--force-confdef -o Dpkg::Options::=--force-confold update"));
    }

    #[test]
    fn reinstall_follows_purge() {
        let fake = Fake::new();
        Ubuntu::new(Debian)
            .post_install_fixes(&Session::new(&fake, "box"))
            .unwrap();

        let rendered: Vec<_> = fake.calls().iter().map(|c| c.rendered()).collect();
        assert_eq!(rendered.len(), 2);
        assert!(rendered[0].ends_with("purge unattended-upgrades"));
        assert!(rendered[1].ends_with("install unattended-upgrades"));
    }
}
