//! Pre-flight check for mapping one host user into a container.
//!
//! lxd only honours a `raw.idmap` entry when the host id is delegated to `root` in
//! `/etc/subuid` and `/etc/subgid`. Applying a mapping that isn't delegated leaves the
//! container with files owned by the wrong host ids, so nothing is applied unless
//! [`IdentityMapping::validate`] succeeded first.

use std::{fmt, path::PathBuf};

/// The owner the container daemon runs as.
pub const DELEGATING_OWNER: &str = "root";

#[derive(Debug, thiserror::Error)]
pub enum IdentityMapError {
    #[error("cannot read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("{table} line {line}: expected `owner:id:count`, got `{content}`")]
    Malformed {
        table: String,
        line: usize,
        content: String,
    },
    #[error("no user named `{0}` on the host")]
    UnknownUser(String),
    #[error("{table} has no `root:{id}:<count>` entry, add one before mapping {kind} {id}")]
    NotDelegated {
        table: String,
        kind: IdKind,
        id: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdKind {
    Uid,
    Gid,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::Uid => write!(f, "uid"),
            IdKind::Gid => write!(f, "gid"),
        }
    }
}

/// One `owner:id:count` record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubIdRange {
    pub owner: String,
    pub start: u32,
    pub count: u32,
}

/// Parses a subuid or subgid table. `table` names it in errors.
pub fn parse_subids(table: &str, contents: &str) -> Result<Vec<SubIdRange>, IdentityMapError> {
    let mut ranges = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let malformed = || IdentityMapError::Malformed {
            table: table.to_string(),
            line: idx + 1,
            content: line.to_string(),
        };

        let mut parts = line.split(':');
        let (owner, start, count) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(owner), Some(start), Some(count), None) if !owner.is_empty() => {
                (owner, start, count)
            }
            _ => return Err(malformed()),
        };

        let start = start.parse().map_err(|_| malformed())?;
        let count = count.parse().map_err(|_| malformed())?;

        ranges.push(SubIdRange {
            owner: owner.to_string(),
            start,
            count,
        });
    }

    Ok(ranges)
}

fn delegated(ranges: &[SubIdRange], id: u32) -> bool {
    // only the start id is checked, not whether the range is long enough
    ranges
        .iter()
        .any(|r| r.owner == DELEGATING_OWNER && r.start == id)
}

/// Succeeds only if both tables delegate exactly `host_uid` / `host_gid` to root.
pub fn validate(
    subuid: &[SubIdRange],
    subgid: &[SubIdRange],
    host_uid: u32,
    host_gid: u32,
) -> Result<(), IdentityMapError> {
    if !delegated(subuid, host_uid) {
        return Err(IdentityMapError::NotDelegated {
            table: String::from("subuid"),
            kind: IdKind::Uid,
            id: host_uid,
        });
    }

    if !delegated(subgid, host_gid) {
        return Err(IdentityMapError::NotDelegated {
            table: String::from("subgid"),
            kind: IdKind::Gid,
            id: host_gid,
        });
    }

    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// Looks `name` up in passwd(5) formatted `contents`.
pub fn resolve_user(contents: &str, name: &str) -> Result<HostUser, IdentityMapError> {
    contents
        .lines()
        .filter(|line| !line.starts_with('#'))
        .map(|line| line.split(':').collect::<Vec<_>>())
        .find(|fields| fields.len() >= 4 && fields[0] == name)
        .and_then(|fields| {
            Some(HostUser {
                name: name.to_string(),
                uid: fields[2].parse().ok()?,
                gid: fields[3].parse().ok()?,
            })
        })
        .ok_or_else(|| IdentityMapError::UnknownUser(name.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityMapping {
    pub guest_uid: u32,
    pub guest_gid: u32,
    pub host_uid: u32,
    pub host_gid: u32,
}

impl IdentityMapping {
    pub fn for_user(user: &HostUser, guest_uid: u32, guest_gid: u32) -> Self {
        Self {
            guest_uid,
            guest_gid,
            host_uid: user.uid,
            host_gid: user.gid,
        }
    }

    pub fn validate(
        self,
        subuid: &[SubIdRange],
        subgid: &[SubIdRange],
    ) -> Result<ValidatedMapping, IdentityMapError> {
        validate(subuid, subgid, self.host_uid, self.host_gid)?;
        Ok(ValidatedMapping(self))
    }
}

/// A mapping the host is known to delegate. Only obtainable through validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidatedMapping(IdentityMapping);

impl ValidatedMapping {
    pub fn mapping(&self) -> &IdentityMapping {
        &self.0
    }

    /// Value for the `raw.idmap` config key
    pub fn raw_idmap(&self) -> String {
        let m = &self.0;
        format!(
            "uid {} {}\ngid {} {}",
            m.host_uid, m.guest_uid, m.host_gid, m.guest_gid
        )
    }
}
