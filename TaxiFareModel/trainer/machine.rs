use std::thread;

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Host resources recorded alongside every training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpecs {
    /// Logical CPU count.
    pub cpus: usize,
    /// Total memory in whole gigabytes (10^9 bytes).
    pub ram_gb: u64,
}

impl MachineSpecs {
    /// Probes the current host.
    #[must_use]
    pub fn detect() -> Self {
        let cpus = thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let mut system = System::new();
        system.refresh_memory();
        Self {
            cpus,
            ram_gb: system.total_memory() / 1_000_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_at_least_one_cpu() {
        let specs = MachineSpecs::detect();
        assert!(specs.cpus >= 1);
    }
}
