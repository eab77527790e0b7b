//! Cooldown of recently finalized container names.
//!
//! A name in cooldown is not admitted again until the cooldown period has
//! elapsed and the host confirms the container is no longer active.

use std::collections::BTreeMap;
use std::time::Duration;

use corral_state::ContainerName;
use tracing::debug;

use crate::host::LocalHost;

#[derive(Debug)]
pub struct Cooldown {
    /// Name → Unix millis when it entered cooldown.
    entries: BTreeMap<ContainerName, u64>,
    period_ms: u64,
}

impl Cooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            period_ms: period.as_millis() as u64,
        }
    }

    pub fn insert(&mut self, name: ContainerName, now: u64) {
        self.entries.entry(name).or_insert(now);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every entry whose period has elapsed and that the host no
    /// longer lists as active.
    pub fn evict_expired(&mut self, host: &LocalHost, now: u64) -> usize {
        let before = self.entries.len();
        let period = self.period_ms;
        self.entries
            .retain(|name, since| host.is_active(name) || now.saturating_sub(*since) < period);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "cooldown entries evicted");
        }
        evicted
    }
}
