// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # irprobe
//!
//! A compiler-side instrumentation engine for dynamic program analysis. `irprobe` rewrites
//! programs in a small SSA intermediate representation so that, at run time, an external
//! analysis library observes function entry and exit, loop iterations with their symbolic
//! bounds, call sites, memory reads and writes, and the registration of variables and
//! arrays. Every reported construct carries a metadata identifier whose descriptor string
//! tells the runtime what the construct is and where it sits in the source.
//!
//! ## Features
//!
//! - **Dense metadata numbering** - one identifier per distinct entity, unique per unit
//! - **Symbolic loop bounds** - start, end and step materialized at the loop preheader
//! - **Dominance-preserving rewriting** - preheaders and dedicated exit blocks on demand
//! - **Separate compilation** - per-unit numbering merged at the entry point by the linker
//! - **Diagnostics** - every transformation and every degradation recorded in an event log
//!
//! ## Quick Start
//!
//! ```rust
//! use irprobe::prelude::*;
//!
//! let mut main = Function::new("main", FunctionType::new(IrType::I32, vec![]));
//! let mut b = Builder::new(&mut main);
//! let entry = b.create_block(Origin::User);
//! b.switch_to_block(entry);
//! let zero = b.iconst(32, 0);
//! b.ret(Some(zero), Origin::User)?;
//!
//! let mut unit = Unit::new("app", "app.c");
//! unit.add_function(main);
//!
//! let engine = Engine::default();
//! let mut units = vec![unit];
//! let report = engine.run(&mut units, &BasicAnalyses::new())?;
//! println!("pool size: {:?}", report.map(|r| r.pool_size));
//! println!("{}", engine.stats());
//! # Ok::<(), irprobe::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - the host program representation: units, functions, blocks, instructions
//! - [`analysis`] - control flow, dominance, loops and the analysis interfaces the engine
//!   consumes
//! - [`instrument`] - registries, materializer, control-flow rewriter, visitor and linker
//! - [`events`] - the diagnostics log
//! - [`config`] - engine and linker settings
//!
//! ## Error Handling
//!
//! Fatal conditions are returned as [`Error`]. Everything the engine can work around, such
//! as an unknown loop bound or an unsupported memory access, is recorded in the
//! [`EventLog`] instead.

#[macro_use]
pub(crate) mod error;

/// Shared graph infrastructure.
pub mod utils;

/// Host program representation.
pub mod ir;

/// Analyses over the IR.
pub mod analysis;

/// The instrumentation engine and entry-point linker.
pub mod instrument;

/// Engine diagnostics.
pub mod events;

/// Engine and linker configuration.
pub mod config;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use irprobe::prelude::*;
///
/// let engine = Engine::new(InstrumentConfig::disabled());
/// assert!(engine.log().is_empty());
/// ```
pub mod prelude;

pub use config::{InstrumentConfig, LinkConfig};
pub use error::{Error, Result};
pub use events::{Event, EventKind, EventLog};
pub use instrument::{Engine, InstrumentationStats, LinkReport};
