//! Request state machine and the live working set.
//!
//! ```text
//! NEW ──(scheduler)──▶ QUEUED ──(any ACTIVE/FINISHED)──▶ RUNNING ──(all FINISHED)──▶ FINISHED
//!                        │                                  │
//!                        └──────────(any FAILED)────────────┴──────────────────────▶ FAILED
//! ```
//!
//! A request's status is a pure function of its current status and the
//! latest known status of each of its containers. Only the scheduler moves a
//! request out of NEW.

use std::collections::{BTreeMap, HashMap};

use corral_state::{ContainerName, ContainerStatus, Request, RequestId, RequestStatus};
use serde::Serialize;

/// Compute the next status of a request from its containers' statuses.
pub fn advance(current: RequestStatus, statuses: &[ContainerStatus]) -> RequestStatus {
    if current.is_terminal() || current == RequestStatus::New {
        return current;
    }
    if statuses.contains(&ContainerStatus::Failed) {
        return RequestStatus::Failed;
    }
    if !statuses.is_empty() && statuses.iter().all(|s| *s == ContainerStatus::Finished) {
        return RequestStatus::Finished;
    }
    if current == RequestStatus::Queued
        && statuses
            .iter()
            .any(|s| matches!(s, ContainerStatus::Active | ContainerStatus::Finished))
    {
        return RequestStatus::Running;
    }
    current
}

/// A request being tracked by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveRequest {
    pub id: RequestId,
    pub status: RequestStatus,
    pub containers: Vec<ContainerName>,
}

/// A status change computed for a live request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub request_id: RequestId,
    pub from: RequestStatus,
    pub to: RequestStatus,
}

/// Requests that have been queued and have not yet reached a terminal state.
#[derive(Debug, Default)]
pub struct LiveRequests {
    requests: BTreeMap<RequestId, LiveRequest>,
}

impl LiveRequests {
    /// Start tracking a request. Terminal requests are ignored.
    pub fn track(&mut self, request: &Request) {
        if request.status.is_terminal() {
            return;
        }
        self.requests.insert(
            request.id.clone(),
            LiveRequest {
                id: request.id.clone(),
                status: request.status,
                containers: request.containers.clone(),
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&LiveRequest> {
        self.requests.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.requests.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveRequest> {
        self.requests.values()
    }

    /// Transitions implied by the given container statuses.
    ///
    /// Containers missing from `statuses` count as CREATED. Nothing is
    /// changed until [`LiveRequests::apply`] is called for a transition.
    pub fn pending_transitions(
        &self,
        statuses: &HashMap<ContainerName, ContainerStatus>,
    ) -> Vec<Transition> {
        self.requests
            .values()
            .filter_map(|req| {
                let observed: Vec<ContainerStatus> = req
                    .containers
                    .iter()
                    .map(|name| {
                        statuses
                            .get(name)
                            .copied()
                            .unwrap_or(ContainerStatus::Created)
                    })
                    .collect();
                let next = advance(req.status, &observed);
                (next != req.status).then(|| Transition {
                    request_id: req.id.clone(),
                    from: req.status,
                    to: next,
                })
            })
            .collect()
    }

    /// Record a persisted transition. Stale transitions are ignored.
    pub fn apply(&mut self, transition: &Transition) -> bool {
        match self.requests.get_mut(&transition.request_id) {
            Some(req) if req.status == transition.from => {
                req.status = transition.to;
                true
            }
            _ => false,
        }
    }

    /// Remove terminal requests, returning them.
    pub fn compact(&mut self) -> Vec<LiveRequest> {
        let done: Vec<RequestId> = self
            .requests
            .values()
            .filter(|r| r.status.is_terminal())
            .map(|r| r.id.clone())
            .collect();
        done.into_iter()
            .filter_map(|id| self.requests.remove(&id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ContainerStatus::*;

    fn queued(id: &str, containers: &[&str]) -> Request {
        let mut r = Request::new(id, containers.iter().map(|c| c.to_string()).collect(), 0);
        r.status = RequestStatus::Queued;
        r
    }

    fn statuses(pairs: &[(&str, ContainerStatus)]) -> HashMap<ContainerName, ContainerStatus> {
        pairs.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    #[test]
    fn advance_follows_lifecycle() {
        assert_eq!(advance(RequestStatus::Queued, &[Created]), RequestStatus::Queued);
        assert_eq!(advance(RequestStatus::Queued, &[Active, Created]), RequestStatus::Running);
        assert_eq!(advance(RequestStatus::Running, &[Finished, Active]), RequestStatus::Running);
        assert_eq!(advance(RequestStatus::Running, &[Finished, Finished]), RequestStatus::Finished);
    }

    #[test]
    fn queued_can_finish_directly() {
        assert_eq!(advance(RequestStatus::Queued, &[Finished]), RequestStatus::Finished);
    }

    #[test]
    fn any_failure_fails_request() {
        assert_eq!(advance(RequestStatus::Running, &[Active, Failed]), RequestStatus::Failed);
        assert_eq!(advance(RequestStatus::Queued, &[Created, Failed]), RequestStatus::Failed);
    }

    #[test]
    fn new_and_terminal_never_move() {
        assert_eq!(advance(RequestStatus::New, &[Active]), RequestStatus::New);
        assert_eq!(advance(RequestStatus::Finished, &[Failed]), RequestStatus::Finished);
        assert_eq!(advance(RequestStatus::Failed, &[Finished]), RequestStatus::Failed);
    }

    #[test]
    fn running_never_regresses() {
        let cases: [&[ContainerStatus]; 3] = [&[Created], &[Created, Created], &[]];
        for observed in cases {
            assert_eq!(advance(RequestStatus::Running, observed), RequestStatus::Running);
        }
    }

    #[test]
    fn empty_request_does_not_finish() {
        assert_eq!(advance(RequestStatus::Queued, &[]), RequestStatus::Queued);
    }

    #[test]
    fn unknown_containers_count_as_created() {
        let mut live = LiveRequests::default();
        live.track(&queued("r1", &["c1", "c2"]));

        let transitions = live.pending_transitions(&statuses(&[("c1", Finished)]));
        assert_eq!(transitions[0].to, RequestStatus::Running);
    }

    #[test]
    fn transitions_apply_then_compact() {
        let mut live = LiveRequests::default();
        live.track(&queued("r1", &["c1"]));
        live.track(&queued("r2", &["c2"]));

        let seen = statuses(&[("c1", Failed), ("c2", Active)]);
        let transitions = live.pending_transitions(&seen);
        assert_eq!(transitions.len(), 2);
        for t in &transitions {
            assert!(live.apply(t));
        }

        let removed = live.compact();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "r1");
        assert_eq!(live.get("r2").unwrap().status, RequestStatus::Running);
        assert!(!live.contains("r1"));
    }

    #[test]
    fn stale_transition_is_ignored() {
        let mut live = LiveRequests::default();
        live.track(&queued("r1", &["c1"]));
        let stale = Transition {
            request_id: "r1".to_string(),
            from: RequestStatus::Running,
            to: RequestStatus::Finished,
        };
        assert!(!live.apply(&stale));
        assert_eq!(live.get("r1").unwrap().status, RequestStatus::Queued);
    }

    #[test]
    fn terminal_requests_are_not_tracked() {
        let mut live = LiveRequests::default();
        let mut done = queued("r1", &["c1"]);
        done.status = RequestStatus::Finished;
        live.track(&done);
        assert!(live.is_empty());
    }
}
