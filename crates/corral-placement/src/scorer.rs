//! Host scoring for placement decisions.
//!
//! A host is a candidate for a request only if its uncommitted cores and
//! memory cover the request's whole reservation. Candidates are ranked
//! best-fit: the host left with the least free memory after placement wins.

use corral_state::{ContainerStatus, Host, Reservation};
use serde::Serialize;

/// Uncommitted capacity of a single host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostCapacity {
    pub hostname: String,
    pub free_cores: u32,
    pub free_memory_bytes: u64,
}

impl HostCapacity {
    /// Capacity left on a reported host once its waiting containers start.
    ///
    /// The agent's advertised availability only accounts for active
    /// containers; inactive CREATED ones are already owned by the host and
    /// will claim their reservation when started.
    pub fn from_host(host: &Host) -> Self {
        let waiting = host
            .inactive
            .iter()
            .filter(|c| c.status == ContainerStatus::Created)
            .fold(Reservation::default(), |acc, c| acc + c.reservation);
        Self {
            hostname: host.hostname.clone(),
            free_cores: host.available_cores.saturating_sub(waiting.cores),
            free_memory_bytes: host.available_memory_bytes.saturating_sub(waiting.memory_bytes),
        }
    }

    pub fn fits(&self, need: Reservation) -> bool {
        self.free_cores >= need.cores && self.free_memory_bytes >= need.memory_bytes
    }

    /// Deduct a reservation assigned earlier in the same cycle.
    pub fn claim(&mut self, need: Reservation) {
        self.free_cores = self.free_cores.saturating_sub(need.cores);
        self.free_memory_bytes = self.free_memory_bytes.saturating_sub(need.memory_bytes);
    }
}

/// Scored candidate host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostScore {
    pub hostname: String,
    /// Memory left after placement (lower = tighter fit = better).
    pub remaining_memory_bytes: u64,
    pub remaining_cores: u32,
}

/// Score a single host for a reservation, or `None` if it doesn't fit.
pub fn score_host(host: &HostCapacity, need: Reservation) -> Option<HostScore> {
    if !host.fits(need) {
        return None;
    }
    Some(HostScore {
        hostname: host.hostname.clone(),
        remaining_memory_bytes: host.free_memory_bytes - need.memory_bytes,
        remaining_cores: host.free_cores - need.cores,
    })
}

/// Score all hosts and return the fitting ones, best first.
///
/// Ties on remaining memory fall back to remaining cores, then hostname, so
/// ranking is deterministic.
pub fn rank_hosts(hosts: &[HostCapacity], need: Reservation) -> Vec<HostScore> {
    let mut scores: Vec<HostScore> = hosts.iter().filter_map(|h| score_host(h, need)).collect();
    scores.sort_by(|a, b| {
        a.remaining_memory_bytes
            .cmp(&b.remaining_memory_bytes)
            .then(a.remaining_cores.cmp(&b.remaining_cores))
            .then_with(|| a.hostname.cmp(&b.hostname))
    });
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_state::Container;

    fn capacity(name: &str, cores: u32, mem: u64) -> HostCapacity {
        HostCapacity {
            hostname: name.to_string(),
            free_cores: cores,
            free_memory_bytes: mem,
        }
    }

    #[test]
    fn rejects_insufficient_cores() {
        let host = capacity("h1", 1, 1024);
        assert!(score_host(&host, Reservation::new(2, 128)).is_none());
    }

    #[test]
    fn rejects_insufficient_memory() {
        let host = capacity("h1", 4, 100);
        assert!(score_host(&host, Reservation::new(1, 128)).is_none());
    }

    #[test]
    fn exact_fit_is_accepted() {
        let host = capacity("h1", 2, 128);
        let score = score_host(&host, Reservation::new(2, 128)).unwrap();
        assert_eq!(score.remaining_memory_bytes, 0);
        assert_eq!(score.remaining_cores, 0);
    }

    #[test]
    fn rank_prefers_tightest_fit() {
        let hosts = vec![
            capacity("roomy", 8, 4096),
            capacity("tight", 8, 256),
            capacity("middle", 8, 1024),
            capacity("full", 8, 64),
        ];
        let ranked = rank_hosts(&hosts, Reservation::new(1, 128));

        let names: Vec<&str> = ranked.iter().map(|s| s.hostname.as_str()).collect();
        assert_eq!(names, vec!["tight", "middle", "roomy"]);
    }

    #[test]
    fn rank_ties_break_on_hostname() {
        let hosts = vec![capacity("h2", 4, 512), capacity("h1", 4, 512)];
        let ranked = rank_hosts(&hosts, Reservation::new(1, 128));
        assert_eq!(ranked[0].hostname, "h1");
    }

    #[test]
    fn waiting_containers_are_committed() {
        let mut host = Host::new("h1", 4, 1024);
        host.inactive
            .push(Container::new("c1", "r1", Reservation::new(3, 1000), 0));
        let mut done = Container::new("c0", "r0", Reservation::new(4, 1024), 0);
        done.status = ContainerStatus::Finished;
        host.inactive.push(done);

        let cap = HostCapacity::from_host(&host);
        assert_eq!(cap.free_cores, 1);
        assert_eq!(cap.free_memory_bytes, 24);
    }
}
