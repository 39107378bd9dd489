//! Waiting for the guest to come up on the network.
//!
//! Readiness is read from the guest's `/proc/net/route`: the guest counts as online once
//! it has a route that is up, goes through a gateway and isn't on loopback.

use bitflags::bitflags;
use std::{net::Ipv4Addr, thread, time::Duration};
use tracing::{info, warn};

use crate::{
    channel::{CommandError, Session},
    config::LaunchConfig,
};

pub const ROUTE_TABLE: &str = "/proc/net/route";

bitflags! {
    /// `RTF_*` from linux/route.h
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RouteFlags: u32 {
        const UP = 0x0001;
        const GATEWAY = 0x0002;
        const HOST = 0x0004;
        const REINSTATE = 0x0008;
        const DYNAMIC = 0x0010;
        const MODIFIED = 0x0020;
        const REJECT = 0x0200;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub iface: String,
    pub destination: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub flags: RouteFlags,
}

impl Route {
    pub fn is_usable(&self) -> bool {
        self.iface != "lo"
            && self.flags.contains(RouteFlags::UP | RouteFlags::GATEWAY)
            && !self.flags.contains(RouteFlags::REJECT)
            && !self.gateway.is_unspecified()
    }
}

/// addresses are the kernel's u32 printed in hex, so in host byte order
fn parse_addr(hex: &str) -> Option<Ipv4Addr> {
    let raw = u32::from_str_radix(hex, 16).ok()?;
    Some(Ipv4Addr::from(raw.to_le_bytes()))
}

/// Parses the route table, skipping the header and anything unreadable.
pub fn parse_routes(table: &str) -> Vec<Route> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<_> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }

            Some(Route {
                iface: fields[0].to_string(),
                destination: parse_addr(fields[1])?,
                gateway: parse_addr(fields[2])?,
                flags: RouteFlags::from_bits_truncate(u32::from_str_radix(fields[3], 16).ok()?),
            })
        })
        .collect()
}

pub fn has_usable_route(routes: &[Route]) -> bool {
    routes.iter().any(Route::is_usable)
}

/// The only place a launch waits on something other than a command.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("no usable route after {probes} probes ({waited:?})")]
    Timeout { probes: u32, waited: Duration },
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Clone, Debug)]
pub struct NetworkPoller {
    pub interval: Duration,
    pub settle: Duration,
    pub timeout: Option<Duration>,
}

impl NetworkPoller {
    pub fn from_config(config: &LaunchConfig) -> Self {
        Self {
            interval: config.poll_interval,
            settle: config.network_settle,
            timeout: config.network_timeout,
        }
    }

    fn probe(&self, session: &Session) -> Result<bool, CommandError> {
        match session.capture(&["cat", ROUTE_TABLE]) {
            Ok(out) => Ok(has_usable_route(&parse_routes(&String::from_utf8_lossy(&out)))),
            // early in boot the exec itself can fail, that's just "not yet"
            Err(CommandError::Failed { code, .. }) => {
                warn!("{}: route probe exited with {:?}", session.container(), code);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Blocks until the guest has a usable route. Returns how many probes it took.
    pub fn wait(&self, session: &Session, sleeper: &dyn Sleeper) -> Result<u32, NetworkError> {
        let mut probes = 0;
        let mut waited = Duration::ZERO;

        loop {
            probes += 1;

            if self.probe(session)? {
                info!("{}: network is up", session.container());
                sleeper.sleep(self.settle);
                return Ok(probes);
            }

            if let Some(timeout) = self.timeout {
                if waited >= timeout {
                    return Err(NetworkError::Timeout { probes, waited });
                }
            }

            info!("{}: waiting for network ({})", session.container(), probes);
            sleeper.sleep(self.interval);
            waited += self.interval;
        }
    }
}
