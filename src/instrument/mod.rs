//! Instrumentation engine.
//!
//! The engine rewrites each [`Unit`] so that, when the program runs, every function entry
//! and exit, loop iteration, call site and memory access is reported to an external runtime
//! library, together with an identifier whose descriptor string says what the construct is
//! and where it came from in the source.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Instrumentation Pipeline                     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  per unit: instrument_unit()                                     │
//! │    ├─ MetadataRegistry       entity -> dense id, descriptors     │
//! │    ├─ TypeRegistry           type -> dense id, bit sizes         │
//! │    ├─ rewrite                preheaders, dedicated exit blocks   │
//! │    ├─ Materializer           loop bounds at the preheader        │
//! │    └─ runtime calls          through pool[base + id]             │
//! │                                                                  │
//! │  whole program: link()                                           │
//! │    ├─ one initializer per unit (id offset, type offset)          │
//! │    └─ allocate pool + init chain at the entry function           │
//! │                                                                  │
//! │  EventLog                    what was done, what was skipped     │
//! │  InstrumentationStats        counters derived from the log       │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Engine`] ties the two stages together and owns the shared event log.

pub mod descriptor;
pub mod linker;
pub mod materialize;
pub mod registry;
pub mod rewrite;
pub mod runtime;
pub mod stats;
pub mod types;
pub mod visitor;

pub use descriptor::{Descriptor, EntityKind};
pub use linker::{link, LinkReport, LinkedUnit};
pub use materialize::Materializer;
pub use registry::{MetaEntity, MetaKind, MetadataRegistry};
pub use rewrite::{ensure_preheader, split_exits, Preheader};
pub use runtime::{RuntimeDecls, RuntimeFn};
pub use stats::InstrumentationStats;
pub use types::TypeRegistry;
pub use visitor::{
    instrument_unit, BoundsMask, DESCRIBE_FN, POOL_GLOBAL, REGISTER_GLOBALS_FN, TYPE_FIXUP_FN,
    TYPE_IDS_GLOBAL, TYPE_SIZES_GLOBAL, UNIT_BASE_GLOBAL,
};

use crate::{
    analysis::AnalysisProvider,
    config::InstrumentConfig,
    events::EventLog,
    ir::{Unit, UnitInstrumentation},
    Error, Result,
};

/// Instruments units and links them into one program.
///
/// The engine holds the configuration and an [`EventLog`] every stage records into. Units can
/// be processed one at a time with [`instrument_unit`](Self::instrument_unit) and
/// [`link`](Self::link), or all at once with [`run`](Self::run).
///
/// # Example
///
/// ```rust
/// use irprobe::analysis::BasicAnalyses;
/// use irprobe::ir::{Builder, Function, FunctionType, IrType, Origin, Unit};
/// use irprobe::{Engine, InstrumentConfig};
///
/// let mut main = Function::new("main", FunctionType::new(IrType::I32, vec![]));
/// let mut b = Builder::new(&mut main);
/// let entry = b.create_block(Origin::User);
/// b.switch_to_block(entry);
/// let zero = b.iconst(32, 0);
/// b.ret(Some(zero), Origin::User)?;
///
/// let mut unit = Unit::new("app", "app.c");
/// unit.add_function(main);
///
/// let engine = Engine::new(InstrumentConfig::default());
/// let mut units = vec![unit];
/// let report = engine.run(&mut units, &BasicAnalyses::new())?;
/// assert_eq!(report.map(|r| r.units.len()), Some(1));
/// assert_eq!(engine.stats().functions, 1);
/// # Ok::<(), irprobe::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct Engine {
    config: InstrumentConfig,
    log: EventLog,
}

impl Engine {
    /// Creates an engine with the given configuration and an empty log.
    #[must_use]
    pub fn new(config: InstrumentConfig) -> Self {
        Self {
            config,
            log: EventLog::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Returns the event log shared by every stage.
    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Instruments one unit.
    ///
    /// # Errors
    ///
    /// See [`visitor::instrument_unit`].
    pub fn instrument_unit<A: AnalysisProvider + ?Sized>(
        &self,
        unit: &mut Unit,
        analyses: &A,
    ) -> Result<UnitInstrumentation> {
        visitor::instrument_unit(unit, analyses, &self.config, &self.log)
    }

    /// Links instrumented units at the configured entry point.
    ///
    /// # Errors
    ///
    /// See [`linker::link`]. A missing entry point is an error here.
    pub fn link(&self, units: &mut [Unit]) -> Result<LinkReport> {
        linker::link(units, &self.config, &self.log)
    }

    /// Instruments every unit, then links them.
    ///
    /// Returns `Ok(None)` when no unit defines the entry point. That case is logged as a
    /// warning: the units are instrumented but nothing initializes the pool, which is what
    /// building a library instead of a program looks like.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any unit or of the link step.
    pub fn run<A: AnalysisProvider + ?Sized>(
        &self,
        units: &mut [Unit],
        analyses: &A,
    ) -> Result<Option<LinkReport>> {
        for unit in units.iter_mut() {
            self.instrument_unit(unit, analyses)?;
        }
        match self.link(units) {
            Ok(report) => Ok(Some(report)),
            Err(Error::EntryPointNotFound(name)) => {
                tracing::warn!("entry point '{}' not found, units left unlinked", name);
                self.log
                    .warn(format!("entry point '{name}' not found, units left unlinked"));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Counts what the engine did so far.
    #[must_use]
    pub fn stats(&self) -> InstrumentationStats {
        InstrumentationStats::from_log(&self.log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::BasicAnalyses,
        events::EventKind,
        ir::{Builder, Function, FunctionType, IrType, Origin},
    };

    fn unit_with(name: &str, func: &str) -> Unit {
        let mut unit = Unit::new(name, format!("{name}.c"));
        let mut f = Function::new(func, FunctionType::new(IrType::Void, vec![]));
        let mut b = Builder::new(&mut f);
        let entry = b.create_block(Origin::User);
        b.switch_to_block(entry);
        b.ret(None, Origin::User).unwrap();
        unit.add_function(f);
        unit
    }

    #[test]
    fn test_run_instruments_and_links() {
        let engine = Engine::default();
        let mut units = vec![unit_with("lib", "helper"), unit_with("app", "main")];
        let report = engine
            .run(&mut units, &BasicAnalyses::new())
            .unwrap()
            .unwrap();
        assert_eq!(report.entry_unit, "app");
        assert_eq!(report.units.len(), 2);
        assert!(units.iter().all(|u| u.instrumentation.is_some()));

        let stats = engine.stats();
        assert_eq!(stats.functions, 2);
        assert_eq!(stats.units_linked, 2);
    }

    #[test]
    fn test_run_without_entry_point_is_not_fatal() {
        let engine = Engine::new(InstrumentConfig::default().with_entry_point("start"));
        let mut units = vec![unit_with("lib", "helper")];
        let report = engine.run(&mut units, &BasicAnalyses::new()).unwrap();
        assert!(report.is_none());
        assert!(units[0].instrumentation.is_some());
        assert!(engine.log().has(EventKind::Warning));

        let err = engine.link(&mut units).unwrap_err();
        assert!(matches!(err, Error::EntryPointNotFound(name) if name == "start"));
    }

    #[test]
    fn test_separate_stages_share_the_log() {
        let engine = Engine::new(InstrumentConfig::disabled());
        let mut unit = unit_with("app", "main");
        let record = engine
            .instrument_unit(&mut unit, &BasicAnalyses::new())
            .unwrap();
        assert!(record.describe_fn.is_some());
        assert!(engine.config().link.max_suffix > 0);

        let mut units = vec![unit];
        engine.link(&mut units).unwrap();
        assert!(engine.log().has(EventKind::FunctionInstrumented));
        assert!(engine.log().has(EventKind::UnitLinked));
    }
}
