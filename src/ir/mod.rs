//! Host program representation.
//!
//! A small SSA intermediate representation the instrumentation engine operates on. A
//! [`Unit`] owns functions and globals; a [`Function`] owns blocks, an instruction arena
//! and a value table. Every entity is addressed through a copyable handle
//! ([`FuncId`], [`GlobalId`], [`BlockId`], [`InstId`], [`ValueId`]) and carries an explicit
//! [`Origin`] provenance tag.
//!
//! # Example
//!
//! ```rust
//! use irprobe::ir::{Builder, Function, FunctionType, IrType, Origin};
//!
//! let mut func = Function::new("answer", FunctionType::new(IrType::I32, vec![]));
//! let mut b = Builder::new(&mut func);
//! let entry = b.create_block(Origin::User);
//! b.switch_to_block(entry);
//! let v = b.iconst(32, 42);
//! b.ret(Some(v), Origin::User)?;
//! assert_eq!(func.successors(entry), vec![]);
//! # Ok::<(), irprobe::Error>(())
//! ```

mod block;
mod builder;
mod debug;
mod function;
mod instruction;
mod ops;
mod types;
mod unit;
mod value;

pub use block::Block;
pub use builder::Builder;
pub use debug::{DebugLoc, DiSubprogram, DiVariable};
pub use function::{Function, InsertPoint, Intrinsic, Linkage};
pub use instruction::{Instruction, Origin};
pub use ops::{BinaryOp, Callee, CastKind, CmpPred, Op};
pub use types::{FunctionType, IrType};
pub use unit::{Global, GlobalInit, Unit, UnitInstrumentation};
pub use value::{BlockId, ConstValue, FuncId, GlobalId, InstId, ValueData, ValueDef, ValueId};
