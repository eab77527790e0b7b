//! Admission policies: shape the free memory the manager may hand out.

use corral_state::Host;

/// Adjusts advertised free memory before local placement.
pub trait AdmissionPolicy: Send + Sync {
    /// Return the free memory the manager may allocate, at most `free_bytes`.
    fn shape_free_memory(&self, host: &Host, free_bytes: u64) -> u64;
}

/// Hands out all free memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unshaped;

impl AdmissionPolicy for Unshaped {
    fn shape_free_memory(&self, _host: &Host, free_bytes: u64) -> u64 {
        free_bytes
    }
}

/// Holds back a fixed fraction of total memory as headroom.
#[derive(Debug, Clone, Copy)]
pub struct Headroom {
    fraction: f64,
}

impl Headroom {
    /// `fraction` is clamped to `0.0..=1.0`.
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) },
        }
    }
}

impl AdmissionPolicy for Headroom {
    fn shape_free_memory(&self, host: &Host, free_bytes: u64) -> u64 {
        let reserve = (host.total_memory_bytes as f64 * self.fraction) as u64;
        free_bytes.saturating_sub(reserve)
    }
}

/// Policy selected by the agent's `memory_headroom_fraction`.
pub fn policy_for(memory_headroom_fraction: f64) -> Box<dyn AdmissionPolicy> {
    if memory_headroom_fraction > 0.0 {
        Box::new(Headroom::new(memory_headroom_fraction))
    } else {
        Box::new(Unshaped)
    }
}
