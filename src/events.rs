//! Event logging for instrumentation and linking.
//!
//! Every transformation the engine performs and every construct it has to leave alone is
//! recorded as an [`Event`]. Degraded outcomes (an unknown loop bound, an unsupported memory
//! access, a unit without instrumentation) are never errors; they show up here instead.
//!
//! - [`Event`] - A single recorded event
//! - [`EventLog`] - Append-only collection of events with query and summary helpers
//! - [`EventBuilder`] - Fluent API for creating events; the event is pushed on drop
//!
//! # Example
//!
//! ```rust
//! use irprobe::events::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::LoopInstrumented)
//!     .at("main", 3)
//!     .message("loop bb1: bounds=7");
//! log.warn("unit b.c has no instrumentation");
//!
//! assert!(log.has(EventKind::LoopInstrumented));
//! assert_eq!(log.warnings().count(), 1);
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

/// Kind of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Transformations
    /// Function entry and exit calls were emitted.
    FunctionInstrumented,
    /// Loop begin, iteration and end calls were emitted.
    LoopInstrumented,
    /// A call site was wrapped with call begin/end calls.
    CallInstrumented,
    /// A read or write call was emitted for a memory access.
    MemoryAccessInstrumented,
    /// A variable or array was registered with the runtime.
    VariableRegistered,
    /// A formal parameter mirror was registered.
    ArgumentRegistered,
    /// A loop preheader was synthesized.
    PreheaderInserted,
    /// A dedicated exit block was synthesized on a loop exit edge.
    ExitBlockInserted,
    /// The unit's type tables and fix-up routine were emitted.
    TypesFinalized,
    /// A link-once function was made internal.
    LinkageInternalized,
    /// A unit initializer was chained into the entry point.
    UnitLinked,

    // Degradations
    /// Some loop bound could not be determined.
    BoundUnknown,
    /// An instruction accesses memory in an unsupported way.
    UnsupportedAccess,
    /// A unit without instrumentation was left out of linking.
    UnitSkipped,

    // Diagnostics
    /// Informational message.
    Info,
    /// Warning message.
    Warning,
    /// Error message.
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::FunctionInstrumented => "function instrumented",
            Self::LoopInstrumented => "loop instrumented",
            Self::CallInstrumented => "call instrumented",
            Self::MemoryAccessInstrumented => "memory access instrumented",
            Self::VariableRegistered => "variable registered",
            Self::ArgumentRegistered => "argument registered",
            Self::PreheaderInserted => "preheader inserted",
            Self::ExitBlockInserted => "exit block inserted",
            Self::TypesFinalized => "types finalized",
            Self::LinkageInternalized => "linkage internalized",
            Self::UnitLinked => "unit linked",
            Self::BoundUnknown => "bound unknown",
            Self::UnsupportedAccess => "unsupported access",
            Self::UnitSkipped => "unit skipped",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event kind represents a change to the IR.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::FunctionInstrumented
                | Self::LoopInstrumented
                | Self::CallInstrumented
                | Self::MemoryAccessInstrumented
                | Self::VariableRegistered
                | Self::ArgumentRegistered
                | Self::PreheaderInserted
                | Self::ExitBlockInserted
                | Self::TypesFinalized
                | Self::LinkageInternalized
                | Self::UnitLinked
        )
    }

    /// Returns true if this event kind records a construct left uninstrumented.
    #[must_use]
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            Self::BoundUnknown | Self::UnsupportedAccess | Self::UnitSkipped
        )
    }

    /// Returns true if this event kind is a diagnostic message.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single recorded event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Unit being processed.
    pub unit: Option<String>,
    /// Function the event applies to.
    pub function: Option<String>,
    /// Instruction index within the function, when meaningful.
    pub location: Option<usize>,
    /// Free-form detail.
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(unit) = &self.unit {
            write!(f, " {unit}")?;
        }
        if let Some(function) = &self.function {
            write!(f, " @{function}")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Fluent builder for events. The event is appended to the log when the builder drops.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    unit: Option<String>,
    function: Option<String>,
    location: Option<usize>,
    message: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            unit: None,
            function: None,
            location: None,
            message: None,
        }
    }

    /// Sets the function and instruction index.
    pub fn at(mut self, function: impl Into<String>, location: usize) -> Self {
        self.function = Some(function.into());
        self.location = Some(location);
        self
    }

    /// Sets the function.
    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Sets the unit.
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the message.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            unit: self.unit.take(),
            function: self.function.take(),
            location: self.location.take(),
            message,
        });
    }
}

/// Append-only event log.
///
/// Appending only needs `&self`, so the log can be shared by the visitor, the rewriter
/// and the linker while each of them holds other mutable state.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        for (_, event) in &self.events {
            new_log.events.push(event.clone());
        }
        new_log
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts recording an event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, msg: impl Into<String>) {
        self.record(EventKind::Info).message(msg);
    }

    /// Records a warning.
    pub fn warn(&self, msg: impl Into<String>) {
        self.record(EventKind::Warning).message(msg);
    }

    /// Records an error message.
    pub fn error(&self, msg: impl Into<String>) {
        self.record(EventKind::Error).message(msg);
    }

    /// Appends every event of `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event has the given kind.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Returns the number of events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Iterates over all events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Iterates over events of one kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| if e.kind == kind { Some(e) } else { None })
    }

    /// Iterates over events recorded for one function.
    pub fn filter_function<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events
            .iter()
            .filter_map(move |(_, e)| (e.function.as_deref() == Some(function)).then_some(e))
    }

    /// Iterates over constructs the engine had to leave uninstrumented.
    pub fn degradations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(|(_, e)| e.kind.is_degradation().then_some(e))
    }

    /// Iterates over warnings, including degradations.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter().filter_map(|(_, e)| {
            (e.kind == EventKind::Warning || e.kind.is_degradation()).then_some(e)
        })
    }

    /// Iterates over error messages.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Error)
    }

    /// Counts events per kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of distinct (unit, function) pairs with a transformation.
    #[must_use]
    pub fn functions_affected(&self) -> usize {
        self.events
            .iter()
            .filter(|(_, e)| e.kind.is_transformation())
            .filter_map(|(_, e)| e.function.as_ref().map(|f| (e.unit.clone(), f.clone())))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Summarizes transformation counts, e.g. `"2 loop instrumented, 1 unit linked"`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = Box<dyn Iterator<Item = &'a Event> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
        assert!(!log.has(EventKind::LoopInstrumented));
        assert_eq!(log.summary(), "no events");
    }

    #[test]
    fn test_record_event() {
        let log = EventLog::new();
        log.record(EventKind::CallInstrumented)
            .unit("a.c")
            .at("main", 4)
            .message("call @f0");

        assert_eq!(log.len(), 1);
        let event = log.iter().next().unwrap();
        assert_eq!(event.function.as_deref(), Some("main"));
        assert_eq!(event.location, Some(4));
        assert_eq!(event.unit.as_deref(), Some("a.c"));
        assert_eq!(event.to_string(), "[call instrumented] a.c @main call @f0");
    }

    #[test]
    fn test_default_message() {
        let log = EventLog::new();
        log.record(EventKind::PreheaderInserted).function("f");
        assert_eq!(log.iter().next().unwrap().message, "preheader inserted");
    }

    #[test]
    fn test_info_warn_error() {
        let log = EventLog::new();
        log.info("informational message");
        log.warn("warning message");
        log.error("error message");
        log.record(EventKind::BoundUnknown).function("f");

        assert_eq!(log.count_kind(EventKind::Info), 1);
        assert_eq!(log.warnings().count(), 2);
        assert_eq!(log.errors().count(), 1);
        assert_eq!(log.degradations().count(), 1);
    }

    #[test]
    fn test_summary_and_counts() {
        let log = EventLog::new();
        log.record(EventKind::LoopInstrumented).function("f");
        log.record(EventKind::LoopInstrumented).function("g");
        log.record(EventKind::UnitLinked).unit("a.c");

        assert_eq!(log.summary(), "1 unit linked, 2 loop instrumented");
        assert_eq!(log.count_by_kind().get(&EventKind::LoopInstrumented), Some(&2));
        assert_eq!(log.functions_affected(), 2);
        assert_eq!(log.filter_function("f").count(), 1);
    }

    #[test]
    fn test_merge_and_clone() {
        let a = EventLog::new();
        let b = EventLog::new();
        a.record(EventKind::TypesFinalized);
        b.record(EventKind::UnitSkipped);
        a.merge(&b);
        let c = a.clone();
        assert_eq!(c.len(), 2);
        assert!(c.has(EventKind::UnitSkipped));
        assert_eq!((&c).into_iter().count(), 2);
    }
}
