//! Placement engine: maps pending requests onto hosts.
//!
//! A strategy sees the full candidate host view and the full pending set
//! once per scheduler cycle and answers with zero or more assignments. It
//! must not mutate its inputs; requests it leaves out stay pending.

use std::collections::HashSet;

use corral_state::{Container, Host, Reservation};
use serde::Serialize;
use tracing::{debug, warn};

use crate::scorer::{HostCapacity, rank_hosts};

/// A queued request waiting for a host, with its container specs.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: String,
    pub created_at: u64,
    pub containers: Vec<Container>,
}

impl PendingRequest {
    /// Sum of all container reservations, `None` if it overflows.
    pub fn reservation(&self) -> Option<Reservation> {
        self.containers
            .iter()
            .try_fold(Reservation::default(), |acc, c| acc.checked_add(c.reservation))
    }
}

/// A placement decision: every container of the request goes to `hostname`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub request_id: String,
    pub hostname: String,
}

/// Pluggable placement strategy.
pub trait PlacementStrategy: Send + Sync {
    /// Assign some (possibly none) of the pending requests to hosts.
    fn assign(&self, hosts: &[Host], pending: &[PendingRequest]) -> Vec<Assignment>;
}

/// Places every container of a request on a single best-fit host.
///
/// Requests are visited oldest first. Capacity claimed by an earlier
/// assignment in the same call is deducted before later requests are scored.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneHostPlacement;

impl PlacementStrategy for OneHostPlacement {
    fn assign(&self, hosts: &[Host], pending: &[PendingRequest]) -> Vec<Assignment> {
        let mut capacity: Vec<HostCapacity> = hosts.iter().map(HostCapacity::from_host).collect();

        let mut order: Vec<&PendingRequest> = pending.iter().collect();
        order.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });

        let mut seen = HashSet::new();
        let mut assignments = Vec::new();
        for request in order {
            if request.containers.is_empty() || !seen.insert(request.request_id.as_str()) {
                continue;
            }
            let Some(need) = request.reservation() else {
                warn!(request_id = %request.request_id, "request reservation overflows, fits no host");
                continue;
            };
            let Some(best) = rank_hosts(&capacity, need).into_iter().next() else {
                debug!(request_id = %request.request_id, ?need, "no host fits request");
                continue;
            };
            if let Some(host) = capacity.iter_mut().find(|h| h.hostname == best.hostname) {
                host.claim(need);
            }
            debug!(
                request_id = %request.request_id,
                hostname = %best.hostname,
                remaining_memory = best.remaining_memory_bytes,
                "request assigned"
            );
            assignments.push(Assignment {
                request_id: request.request_id.clone(),
                hostname: best.hostname,
            });
        }
        assignments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn host(name: &str, cores: u32, mem_mb: u64) -> Host {
        Host::new(name, cores, mem_mb * MB)
    }

    fn pending(id: &str, created_at: u64, containers: &[(u32, u64)]) -> PendingRequest {
        PendingRequest {
            request_id: id.to_string(),
            created_at,
            containers: containers
                .iter()
                .enumerate()
                .map(|(i, (cores, mem_mb))| {
                    Container::new(
                        format!("{id}-c{i}"),
                        id,
                        Reservation::new(*cores, mem_mb * MB),
                        created_at,
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn places_whole_request_on_one_host() {
        let hosts = vec![host("h1", 4, 1024)];
        let reqs = vec![pending("r1", 1, &[(1, 128), (2, 256)])];

        let out = OneHostPlacement.assign(&hosts, &reqs);
        assert_eq!(
            out,
            vec![Assignment {
                request_id: "r1".to_string(),
                hostname: "h1".to_string()
            }]
        );
    }

    #[test]
    fn request_larger_than_any_host_is_left_pending() {
        let hosts = vec![host("h1", 2, 1024), host("h2", 2, 1024)];
        let reqs = vec![pending("r1", 1, &[(2, 128), (1, 128)])];

        assert!(OneHostPlacement.assign(&hosts, &reqs).is_empty());
    }

    #[test]
    fn capacity_is_deducted_within_a_cycle() {
        let hosts = vec![host("h1", 2, 1024)];
        let reqs = vec![
            pending("r1", 1, &[(2, 128)]),
            pending("r2", 2, &[(1, 128)]),
        ];

        let out = OneHostPlacement.assign(&hosts, &reqs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].request_id, "r1");
    }

    #[test]
    fn oldest_request_wins_contended_capacity() {
        let hosts = vec![host("h1", 1, 1024)];
        let reqs = vec![pending("late", 20, &[(1, 64)]), pending("early", 10, &[(1, 64)])];

        let out = OneHostPlacement.assign(&hosts, &reqs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].request_id, "early");
    }

    #[test]
    fn best_fit_host_is_chosen() {
        let hosts = vec![host("big", 8, 8192), host("small", 8, 512)];
        let reqs = vec![pending("r1", 1, &[(1, 256)])];

        let out = OneHostPlacement.assign(&hosts, &reqs);
        assert_eq!(out[0].hostname, "small");
    }

    #[test]
    fn overflowing_request_fits_nowhere() {
        let hosts = vec![host("h1", 8, 1024)];
        let reqs = vec![
            pending("huge", 1, &[(u32::MAX, 128), (u32::MAX, 128)]),
            pending("small", 2, &[(1, 128)]),
        ];

        assert_eq!(reqs[0].reservation(), None);
        let out = OneHostPlacement.assign(&hosts, &reqs);
        assert_eq!(
            out,
            vec![Assignment {
                request_id: "small".to_string(),
                hostname: "h1".to_string()
            }]
        );
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        assert!(OneHostPlacement.assign(&[], &[pending("r1", 1, &[(1, 1)])]).is_empty());
        assert!(OneHostPlacement.assign(&[host("h1", 1, 1)], &[]).is_empty());
    }

    #[test]
    fn inputs_are_not_mutated() {
        let hosts = vec![host("h1", 4, 1024)];
        let reqs = vec![pending("r1", 1, &[(1, 128)])];
        let hosts_before = hosts.clone();

        OneHostPlacement.assign(&hosts, &reqs);
        assert_eq!(hosts, hosts_before);
        assert_eq!(reqs[0].containers.len(), 1);
    }
}
