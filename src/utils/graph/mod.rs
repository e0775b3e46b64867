//! Generic directed-graph infrastructure.
//!
//! The control-flow analyses in [`crate::analysis`] are written against the traits in this
//! module rather than against the IR directly, so the same dominator and traversal code runs
//! over function CFGs and over the small hand-built graphs used in tests.
//!
//! - [`NodeId`] - strongly-typed node index
//! - [`GraphBase`], [`Successors`], [`Predecessors`], [`RootedGraph`] - capability traits
//! - [`AdjacencyGraph`] - compact adjacency-list graph implementing all traits
//! - [`algorithms`] - dominators and depth-first orders

mod adjacency;
mod node;
mod traits;

pub mod algorithms;

pub use adjacency::AdjacencyGraph;
pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};
