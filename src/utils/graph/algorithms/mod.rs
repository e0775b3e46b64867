//! Graph algorithms over the traits in [`crate::utils::graph`].
//!
//! - [`compute_dominators`] - dominator tree construction
//! - [`postorder`], [`reverse_postorder`] - depth-first orders

mod dominators;
mod traversal;

pub use dominators::{compute_dominators, compute_dominators_rooted, DominatorTree};
pub use traversal::{postorder, reverse_postorder};
