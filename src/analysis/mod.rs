//! Analyses over the IR consumed by the instrumentation engine.
//!
//! - [`cfg`]: block graph snapshot and instruction-level dominance
//! - [`loops`]: natural loop forest with preheaders, exits and induction variables
//! - [`symbolic`]: symbolic integer expressions for loop bounds and steps
//! - [`provider`]: interfaces to upstream analyses plus a reference implementation
//! - [`verify`]: structural and dominance verifier

pub mod cfg;
pub mod loops;
pub mod provider;
pub mod symbolic;
pub mod verify;

pub use cfg::{ControlFlowGraph, Dominance};
pub use loops::{detect_loops, InductionUpdateKind, InductionVar, LoopExit, LoopForest, LoopInfo};
pub use provider::{
    AccessClass, AccessFlags, AnalysisProvider, BasicAnalyses, CanonicalLoop, CanonicalLoopInfo,
    DebugInfoLookup, MemoryAccess, MemoryAccessClassifier, Region, RegionInfo,
};
pub use symbolic::SymbolicExpr;
pub use verify::{verify_function, verify_unit, Location, VerifyError, VerifyResult};
