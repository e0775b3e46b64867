//! Instrumentation counters derived from an event log.

use std::fmt;

use crate::events::{EventKind, EventLog};

/// Statistics about what the engine instrumented.
///
/// Built from an [`EventLog`] after the fact, so it covers every unit that logged into it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentationStats {
    /// Number of function bodies instrumented.
    pub functions: usize,
    /// Number of loops instrumented.
    pub loops: usize,
    /// Number of call sites wrapped.
    pub calls: usize,
    /// Number of scalar reads.
    pub scalar_reads: usize,
    /// Number of array element reads.
    pub array_reads: usize,
    /// Number of scalar writes.
    pub scalar_writes: usize,
    /// Number of array element writes.
    pub array_writes: usize,
    /// Number of registered scalar variables.
    pub variables: usize,
    /// Number of registered arrays.
    pub arrays: usize,
    /// Number of formal parameter mirrors.
    pub arguments: usize,
    /// Number of loops with at least one unknown bound.
    pub unknown_bounds: usize,
    /// Number of memory accesses left uninstrumented.
    pub unsupported_accesses: usize,
    /// Number of units linked.
    pub units_linked: usize,
    /// Number of units skipped by the linker.
    pub units_skipped: usize,
}

impl InstrumentationStats {
    /// Counts the events in `log`.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let mut stats = Self::default();
        for event in log {
            let message = event.message.as_str();
            match event.kind {
                EventKind::FunctionInstrumented => stats.functions += 1,
                EventKind::LoopInstrumented => stats.loops += 1,
                EventKind::CallInstrumented => stats.calls += 1,
                EventKind::MemoryAccessInstrumented => match message {
                    "read scalar" => stats.scalar_reads += 1,
                    "read array" => stats.array_reads += 1,
                    "write scalar" => stats.scalar_writes += 1,
                    "write array" => stats.array_writes += 1,
                    _ => {}
                },
                EventKind::VariableRegistered if message == "array" => stats.arrays += 1,
                EventKind::VariableRegistered => stats.variables += 1,
                EventKind::ArgumentRegistered => stats.arguments += 1,
                EventKind::BoundUnknown => stats.unknown_bounds += 1,
                EventKind::UnsupportedAccess => stats.unsupported_accesses += 1,
                EventKind::UnitLinked => stats.units_linked += 1,
                EventKind::UnitSkipped => stats.units_skipped += 1,
                _ => {}
            }
        }
        stats
    }

    /// Returns the total number of instrumented memory accesses.
    #[must_use]
    pub fn memory_accesses(&self) -> usize {
        self.scalar_reads + self.array_reads + self.scalar_writes + self.array_writes
    }

    /// Returns the share of loops whose bounds are fully known, in percent.
    ///
    /// 100.0 when no loop was instrumented.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bound_coverage(&self) -> f64 {
        if self.loops == 0 {
            100.0
        } else {
            (self.loops.saturating_sub(self.unknown_bounds) as f64 / self.loops as f64) * 100.0
        }
    }
}

impl fmt::Display for InstrumentationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "functions:     {}", self.functions)?;
        writeln!(
            f,
            "loops:         {} ({} with unknown bounds)",
            self.loops, self.unknown_bounds
        )?;
        writeln!(f, "calls:         {}", self.calls)?;
        writeln!(
            f,
            "reads:         {} scalar, {} array",
            self.scalar_reads, self.array_reads
        )?;
        writeln!(
            f,
            "writes:        {} scalar, {} array",
            self.scalar_writes, self.array_writes
        )?;
        writeln!(
            f,
            "variables:     {} scalar, {} array, {} arguments",
            self.variables, self.arrays, self.arguments
        )?;
        writeln!(f, "unsupported:   {}", self.unsupported_accesses)?;
        write!(
            f,
            "units:         {} linked, {} skipped",
            self.units_linked, self.units_skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_follow_messages() {
        let log = EventLog::new();
        log.record(EventKind::MemoryAccessInstrumented).message("read array");
        log.record(EventKind::MemoryAccessInstrumented).message("write scalar");
        log.record(EventKind::MemoryAccessInstrumented).message("write scalar");
        log.record(EventKind::VariableRegistered).message("array");
        log.record(EventKind::VariableRegistered).message("scalar");
        log.record(EventKind::LoopInstrumented);
        log.record(EventKind::LoopInstrumented);
        log.record(EventKind::BoundUnknown);
        log.warn("unrelated");

        let stats = InstrumentationStats::from_log(&log);
        assert_eq!(stats.array_reads, 1);
        assert_eq!(stats.scalar_writes, 2);
        assert_eq!(stats.memory_accesses(), 3);
        assert_eq!(stats.arrays, 1);
        assert_eq!(stats.variables, 1);
        assert_eq!(stats.loops, 2);
        assert!((stats.bound_coverage() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_log() {
        let stats = InstrumentationStats::from_log(&EventLog::new());
        assert_eq!(stats, InstrumentationStats::default());
        assert!((stats.bound_coverage() - 100.0).abs() < f64::EPSILON);
        assert!(stats.to_string().contains("functions:     0"));
    }
}
