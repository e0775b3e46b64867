//! # irprobe Prelude
//!
//! The types needed to build a unit, instrument it and link it, in one import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all irprobe operations
pub use crate::Error;

/// The result type used throughout irprobe
pub use crate::Result;

// ================================================================================================
// Engine
// ================================================================================================

/// Pipeline entry point and its configuration
pub use crate::{Engine, InstrumentConfig, LinkConfig};

/// Diagnostics
pub use crate::{Event, EventKind, EventLog};

/// Results of instrumentation and linking
pub use crate::instrument::{BoundsMask, InstrumentationStats, LinkReport, LinkedUnit, RuntimeFn};

// ================================================================================================
// Program Representation
// ================================================================================================

/// Units, functions and instruction building
pub use crate::ir::{
    BinaryOp, Builder, Callee, CmpPred, DebugLoc, DiSubprogram, DiVariable, Function,
    FunctionType, Global, GlobalInit, IrType, Linkage, Op, Origin, Unit, UnitInstrumentation,
};

/// Handles
pub use crate::ir::{BlockId, FuncId, GlobalId, InstId, ValueId};

// ================================================================================================
// Analyses
// ================================================================================================

/// Analysis interfaces and the reference provider
pub use crate::analysis::{AnalysisProvider, BasicAnalyses, CanonicalLoop, SymbolicExpr};
