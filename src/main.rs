use std::{path::PathBuf, process::exit, time::Duration};

use relaunch::{
    config::{LaunchConfig, DEFAULT_TOOL},
    host::lxc::Lxc,
    launch::{Launcher, EXIT_USAGE},
    machines,
    network::ThreadSleeper,
};
use tracing::{error, info};

#[derive(argh::FromArgs)]
/// destroy and rebuild a container from its machine definition
struct Arguments {
    /// machine to launch
    #[argh(positional)]
    machine: Option<String>,

    #[argh(option)]
    /// host bridge to attach eth0 to
    bridge: Option<String>,

    #[argh(switch)]
    /// leave the profile's network alone, even with --bridge
    no_bridge: bool,

    #[argh(option)]
    /// host user that gets an admin account, defaults to $SUDO_USER
    admin: Option<String>,

    #[argh(switch)]
    /// no admin account, desktops will refuse to launch
    no_admin: bool,

    #[argh(option)]
    /// directory holding the persistent mounts
    root: Option<PathBuf>,

    #[argh(option)]
    /// guest timezone, e.g. Europe/Oslo
    timezone: Option<String>,

    #[argh(option)]
    /// give up waiting for the guest network after this many seconds
    network_timeout: Option<u64>,

    #[argh(option, default = "String::from(DEFAULT_TOOL)")]
    /// container tool: lxc or incus
    tool: String,

    #[argh(switch)]
    /// print the known machines and exit
    list: bool,
}

impl Arguments {
    fn config(&self) -> LaunchConfig {
        let mut config = LaunchConfig {
            tool: self.tool.clone(),
            ..LaunchConfig::default()
        };

        if !self.no_bridge {
            config.bridge = self.bridge.clone();
        }

        if !self.no_admin {
            config.admin_user = self
                .admin
                .clone()
                .or_else(|| std::env::var("SUDO_USER").ok())
                .filter(|user| user != "root");
        }

        if let Some(root) = &self.root {
            config.persistent_root = root.clone();
        }

        if let Some(zone) = &self.timezone {
            config.timezone = zone.clone();
        }

        config.network_timeout = self.network_timeout.map(Duration::from_secs);
        config
    }
}

fn usage(given: Option<&str>) -> ! {
    if let Some(name) = given {
        eprintln!("unknown machine: {}", name);
    }
    eprintln!("usage: relaunch <machine> [--help]");
    eprintln!("machines: {}", machines::names().join(", "));
    exit(EXIT_USAGE);
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Arguments = argh::from_env();

    if args.list {
        for name in machines::names() {
            println!("{}", name);
        }
        return;
    }

    let machine = match args.machine.as_deref().map(|name| (name, machines::lookup(name))) {
        Some((_, Some(machine))) => machine,
        Some((name, None)) => usage(Some(name)),
        None => usage(None),
    };

    let config = args.config();
    let host = Lxc::new(config.tool.clone());
    let sleeper = ThreadSleeper;

    match Launcher::new(&host, &config, &sleeper, machine).launch() {
        Ok(state) => info!("{}: {}", machine.name, state),
        Err(err) => {
            let code = err.exit_code();
            error!("{}: {:?}", machine.name, anyhow::Error::from(err));
            exit(code);
        }
    }
}
