//! Host directory: tracks every host that has ever reported.
//!
//! Hosts join implicitly with their first report and are keyed by hostname,
//! so a re-report overwrites in place. A host whose last report is older
//! than the timeout is marked unreachable; it stays in the directory but is
//! no longer offered to placement.

use std::collections::BTreeMap;
use std::time::Duration;

use corral_state::{Host, Hostname};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Liveness of a host as judged by report recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Liveness {
    Alive,
    Unreachable,
}

/// Controller-side view of a host.
#[derive(Debug, Clone, Serialize)]
pub struct Member {
    /// Latest reported snapshot.
    pub host: Host,
    /// Controller clock (Unix millis) when the last report arrived.
    pub last_seen: u64,
    pub liveness: Liveness,
}

/// Hostname-keyed collection of cluster members.
#[derive(Debug)]
pub struct HostDirectory {
    members: BTreeMap<Hostname, Member>,
    timeout: Duration,
}

impl HostDirectory {
    pub fn new(timeout: Duration) -> Self {
        Self {
            members: BTreeMap::new(),
            timeout,
        }
    }

    /// Replace the stored snapshot for `host.hostname` and mark it alive.
    ///
    /// Returns true if the host was unknown or had been unreachable.
    pub fn upsert(&mut self, host: Host, now: u64) -> bool {
        let hostname = host.hostname.clone();
        let member = Member {
            host,
            last_seen: now,
            liveness: Liveness::Alive,
        };
        match self.members.insert(hostname.clone(), member) {
            None => {
                info!(%hostname, "host joined");
                true
            }
            Some(previous) if previous.liveness == Liveness::Unreachable => {
                info!(%hostname, "host reachable again");
                true
            }
            Some(_) => {
                debug!(%hostname, "host snapshot updated");
                false
            }
        }
    }

    pub fn get(&self, hostname: &str) -> Option<&Member> {
        self.members.get(hostname)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All members, ordered by hostname.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Snapshots of the hosts currently eligible for placement.
    pub fn alive_hosts(&self) -> Vec<Host> {
        self.members
            .values()
            .filter(|m| m.liveness == Liveness::Alive)
            .map(|m| m.host.clone())
            .collect()
    }

    /// Mark hosts silent for longer than the timeout as unreachable.
    ///
    /// Returns the hostnames that changed state on this call.
    pub fn mark_unreachable(&mut self, now: u64) -> Vec<Hostname> {
        let timeout = self.timeout.as_millis() as u64;
        let mut marked = Vec::new();
        for (hostname, member) in &mut self.members {
            if member.liveness == Liveness::Alive && now.saturating_sub(member.last_seen) > timeout
            {
                member.liveness = Liveness::Unreachable;
                warn!(%hostname, last_seen = member.last_seen, "host unreachable");
                marked.push(hostname.clone());
            }
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> HostDirectory {
        HostDirectory::new(Duration::from_millis(30_000))
    }

    #[test]
    fn re_report_overwrites_in_place() {
        let mut dir = directory();
        let mut h1 = Host::new("h1", 4, 1024);
        assert!(dir.upsert(h1.clone(), 1_000));

        h1.available_cores = 1;
        assert!(!dir.upsert(h1, 2_000));

        assert_eq!(dir.len(), 1);
        let member = dir.get("h1").unwrap();
        assert_eq!(member.host.available_cores, 1);
        assert_eq!(member.last_seen, 2_000);
    }

    #[test]
    fn silent_host_becomes_unreachable_but_stays() {
        let mut dir = directory();
        dir.upsert(Host::new("h1", 4, 1024), 1_000);
        dir.upsert(Host::new("h2", 4, 1024), 20_000);

        let marked = dir.mark_unreachable(40_000);
        assert_eq!(marked, vec!["h1".to_string()]);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.get("h1").unwrap().liveness, Liveness::Unreachable);

        let alive: Vec<String> = dir.alive_hosts().into_iter().map(|h| h.hostname).collect();
        assert_eq!(alive, vec!["h2".to_string()]);
    }

    #[test]
    fn marking_is_reported_once() {
        let mut dir = directory();
        dir.upsert(Host::new("h1", 4, 1024), 0);
        assert_eq!(dir.mark_unreachable(31_000).len(), 1);
        assert!(dir.mark_unreachable(60_000).is_empty());
    }

    #[test]
    fn fresh_report_revives_host() {
        let mut dir = directory();
        dir.upsert(Host::new("h1", 4, 1024), 0);
        dir.mark_unreachable(31_000);

        assert!(dir.upsert(Host::new("h1", 4, 1024), 32_000));
        assert_eq!(dir.get("h1").unwrap().liveness, Liveness::Alive);
        assert_eq!(dir.alive_hosts().len(), 1);
    }
}
