//! Stats tracer - counts events, op-classes, registers and branch outcomes.
//!
//! Aggregates instead of recording, so memory use depends on the number of
//! distinct branch sites and touched addresses rather than on run length.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::Result;
use crate::event::{Event, EventKind, OpClass};
use crate::metrics;
use crate::tracer::Tracer;

const NUM_KINDS: usize = EventKind::ALL.len();
const NUM_REGS: usize = 32;

/// Per-site branch outcome counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BranchSite {
    pub taken: u64,
    pub not_taken: u64,
    /// Last reported target (the would-be target for not-taken branches).
    pub target: u64,
}

impl BranchSite {
    pub const fn total(&self) -> u64 {
        self.taken + self.not_taken
    }

    /// Fraction of executions that went the majority way; what a perfect
    /// static predictor would achieve at this site.
    #[allow(clippy::cast_precision_loss)]
    pub fn bias(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.taken.max(self.not_taken) as f64 / total as f64
    }
}

/// Aggregating tracer: per-kind, per-register and per-branch-site counts.
#[derive(Default)]
pub struct StatsTracer {
    kinds: [u64; NUM_KINDS],
    op_classes: FxHashMap<OpClass, u64>,
    reg_reads: [u64; NUM_REGS],
    reg_writes: [u64; NUM_REGS],
    branches: FxHashMap<u64, BranchSite>,
    mem_addrs: FxHashSet<u64>,
}

impl StatsTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of one kind.
    pub fn count(&self, kind: EventKind) -> u64 {
        self.kinds[kind.index() as usize]
    }

    /// Total events seen.
    pub fn total(&self) -> u64 {
        self.kinds.iter().sum()
    }

    pub fn instructions(&self) -> u64 {
        self.count(EventKind::InstructionFetch)
    }

    pub fn blocks(&self) -> u64 {
        self.count(EventKind::BlockEnter)
    }

    /// Fetched instructions per op-class.
    pub const fn op_classes(&self) -> &FxHashMap<OpClass, u64> {
        &self.op_classes
    }

    pub const fn reg_reads(&self) -> &[u64; NUM_REGS] {
        &self.reg_reads
    }

    pub const fn reg_writes(&self) -> &[u64; NUM_REGS] {
        &self.reg_writes
    }

    pub const fn branch_sites(&self) -> &FxHashMap<u64, BranchSite> {
        &self.branches
    }

    /// Distinct memory addresses accessed.
    pub fn unique_addresses(&self) -> usize {
        self.mem_addrs.len()
    }

    pub fn branches_taken(&self) -> u64 {
        self.count(EventKind::BranchTaken)
    }

    pub fn branches_not_taken(&self) -> u64 {
        self.count(EventKind::BranchNotTaken)
    }

    /// Op-classes by descending instruction count.
    pub fn top_op_classes(&self, n: usize) -> Vec<(OpClass, u64)> {
        let mut classes: Vec<_> = self.op_classes.iter().map(|(k, v)| (*k, *v)).collect();
        classes.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        classes.truncate(n);
        classes
    }

    /// Executions a per-site static predictor would get right.
    pub fn predictable_branches(&self) -> u64 {
        self.branches
            .values()
            .map(|site| site.taken.max(site.not_taken))
            .sum()
    }
}

impl Tracer for StatsTracer {
    fn fini(&mut self) -> Result<()> {
        metrics::record_session("stats", self.total(), 0);
        debug!(
            instructions = self.instructions(),
            blocks = self.blocks(),
            taken = self.branches_taken(),
            not_taken = self.branches_not_taken(),
            unique_addrs = self.unique_addresses(),
            "trace stats"
        );
        Ok(())
    }

    #[inline]
    fn trace_event(&mut self, event: Event) {
        self.kinds[event.kind().index() as usize] += 1;
        match event {
            Event::InstructionFetch { op, .. } => {
                *self.op_classes.entry(op).or_insert(0) += 1;
            }
            Event::RegisterRead { reg, .. } => {
                if let Some(n) = self.reg_reads.get_mut(usize::from(reg)) {
                    *n += 1;
                }
            }
            Event::RegisterWrite { reg, .. } => {
                if let Some(n) = self.reg_writes.get_mut(usize::from(reg)) {
                    *n += 1;
                }
            }
            Event::MemoryRead { addr, .. } | Event::MemoryWrite { addr, .. } => {
                self.mem_addrs.insert(addr);
            }
            Event::BranchTaken { pc, target, .. } => {
                let site = self.branches.entry(pc).or_default();
                site.taken += 1;
                site.target = target;
            }
            Event::BranchNotTaken { pc, target, .. } => {
                let site = self.branches.entry(pc).or_default();
                site.not_taken += 1;
                site.target = target;
            }
            Event::BlockEnter { .. }
            | Event::OpcodeDecoded { .. }
            | Event::CsrRead { .. }
            | Event::CsrWrite { .. } => {}
        }
    }
}

impl fmt::Display for StatsTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "instructions: {}", self.instructions())?;
        writeln!(f, "blocks:       {}", self.blocks())?;
        let branches = self.branches_taken() + self.branches_not_taken();
        writeln!(
            f,
            "branches:     {} ({} taken, {} sites, {} predictable)",
            branches,
            self.branches_taken(),
            self.branches.len(),
            self.predictable_branches()
        )?;
        writeln!(f, "mem addrs:    {}", self.unique_addresses())?;
        for (op, count) in self.top_op_classes(8) {
            writeln!(f, "  {op:<14} {count}")?;
        }
        Ok(())
    }
}
