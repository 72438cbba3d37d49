//! Performance statistics collection for `--stats` output.

use std::time::{Duration, Instant};

/// Collects performance counters and phase timings.
///
/// Created when `--stats` is passed, threaded as `Option<&mut Stats>`.
/// Zero cost when `None`: no timing calls, no counter increments.
pub struct Stats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    // Execution
    pub component_runs: u32,
    pub solver_iterations: u32,
    pub compute: Duration,
    // Data transfers
    pub local_transfers: u32,
    pub collective_transfers: u32,
    pub transfer: Duration,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            component_runs: 0,
            solver_iterations: 0,
            compute: Duration::ZERO,
            local_transfers: 0,
            collective_transfers: 0,
            transfer: Duration::ZERO,
        }
    }

    /// Record a completed phase with its duration.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        self.phases.push((name, duration));
    }

    pub fn phases(&self) -> &[(&'static str, Duration)] {
        &self.phases
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== Coupler Run Stats ===");

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        eprintln!("  Component runs:         {}", self.component_runs);
        eprintln!("    Compute:              {:>8.3}s", self.compute.as_secs_f64());
        if self.solver_iterations > 0 {
            eprintln!("  Solver iterations:      {}", self.solver_iterations);
        }
        eprintln!(
            "  Transfers:              local={}  collective={}",
            self.local_transfers, self.collective_transfers
        );
        eprintln!("    Transfer:             {:>8.3}s", self.transfer.as_secs_f64());

        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}
