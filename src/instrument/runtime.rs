//! Catalogue of the runtime analysis library's entry points.
//!
//! The engine only ever emits calls into the runtime; it never defines these functions. Each
//! [`RuntimeFn`] has a fixed symbol name and signature. Metadata arguments are pointers to
//! metadata pool slots, addresses are pointers, and counters and sizes are 64-bit integers.
//! Loop bounds use the configured bound width.

use std::collections::HashMap;

use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    ir::{FuncId, Function, FunctionType, IrType, Origin, Unit},
    Error, Result,
};

/// A runtime-library function the engine calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, IntoStaticStr)]
pub enum RuntimeFn {
    /// `funcBegin(funcMeta)`
    #[strum(serialize = "irprobe_func_begin")]
    FuncBegin,
    /// `funcEnd(funcMeta)`
    #[strum(serialize = "irprobe_func_end")]
    FuncEnd,
    /// `callBegin(locMeta, funcMeta)`
    #[strum(serialize = "irprobe_call_begin")]
    CallBegin,
    /// `callEnd(funcMeta)`
    #[strum(serialize = "irprobe_call_end")]
    CallEnd,
    /// `loopBegin(loopMeta, start, end, step)`
    #[strum(serialize = "irprobe_loop_begin")]
    LoopBegin,
    /// `loopIter(loopMeta, iterCount)`
    #[strum(serialize = "irprobe_loop_iter")]
    LoopIter,
    /// `loopEnd(loopMeta)`
    #[strum(serialize = "irprobe_loop_end")]
    LoopEnd,
    /// `readScalar(locMeta, addr, varMeta)`
    #[strum(serialize = "irprobe_read_scalar")]
    ReadScalar,
    /// `readArray(locMeta, addr, varMeta, baseAddr)`
    #[strum(serialize = "irprobe_read_array")]
    ReadArray,
    /// `writeScalar(locMeta, addr, varMeta)`
    #[strum(serialize = "irprobe_write_scalar")]
    WriteScalar,
    /// `writeArray(locMeta, addr, varMeta, baseAddr)`
    #[strum(serialize = "irprobe_write_array")]
    WriteArray,
    /// `regVar(varMeta, addr)`
    #[strum(serialize = "irprobe_reg_var")]
    RegVar,
    /// `regArray(varMeta, size, addr)`
    #[strum(serialize = "irprobe_reg_arr")]
    RegArray,
    /// `regDummyVar(funcMeta, addr, argPosition)`
    #[strum(serialize = "irprobe_reg_dummy_var")]
    RegDummyVar,
    /// `regDummyArr(funcMeta, size, addr, argPosition)`
    #[strum(serialize = "irprobe_reg_dummy_arr")]
    RegDummyArr,
    /// `declTypes(count, idArray, sizeArray)`
    #[strum(serialize = "irprobe_decl_types")]
    DeclTypes,
    /// `allocatePool(poolHandle, size)`
    #[strum(serialize = "irprobe_allocate_pool")]
    AllocatePool,
    /// `initDI(slotPtr, descriptorString, offset)`
    #[strum(serialize = "irprobe_init_di")]
    InitDi,
}

impl RuntimeFn {
    /// Returns the symbol name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns the signature for loop bounds of width `bound_bits`.
    #[must_use]
    pub fn signature(self, bound_bits: u16) -> FunctionType {
        let bound = IrType::Int(bound_bits);
        let params = match self {
            RuntimeFn::FuncBegin | RuntimeFn::FuncEnd | RuntimeFn::CallEnd | RuntimeFn::LoopEnd => {
                vec![IrType::Ptr]
            }
            RuntimeFn::CallBegin | RuntimeFn::RegVar => vec![IrType::Ptr, IrType::Ptr],
            RuntimeFn::LoopBegin => vec![IrType::Ptr, bound.clone(), bound.clone(), bound],
            RuntimeFn::LoopIter => vec![IrType::Ptr, IrType::I64],
            RuntimeFn::ReadScalar | RuntimeFn::WriteScalar => {
                vec![IrType::Ptr, IrType::Ptr, IrType::Ptr]
            }
            RuntimeFn::ReadArray | RuntimeFn::WriteArray => {
                vec![IrType::Ptr, IrType::Ptr, IrType::Ptr, IrType::Ptr]
            }
            RuntimeFn::RegArray => vec![IrType::Ptr, IrType::I64, IrType::Ptr],
            RuntimeFn::RegDummyVar => vec![IrType::Ptr, IrType::Ptr, IrType::I64],
            RuntimeFn::RegDummyArr => vec![IrType::Ptr, IrType::I64, IrType::Ptr, IrType::I64],
            RuntimeFn::DeclTypes => vec![IrType::I64, IrType::Ptr, IrType::Ptr],
            RuntimeFn::AllocatePool => vec![IrType::Ptr, IrType::I64],
            RuntimeFn::InitDi => vec![IrType::Ptr, IrType::Ptr, IrType::I64],
        };
        FunctionType::new(IrType::Void, params)
    }

    /// Looks a catalogue entry up by symbol name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<RuntimeFn> {
        RuntimeFn::iter().find(|f| f.name() == name)
    }
}

/// Declares `rt` in `unit`, reusing an existing compatible declaration.
///
/// # Errors
///
/// Returns [`Error::RuntimeSignature`] if a symbol of the same name exists with another
/// signature, or if the name belongs to a global.
pub fn declare(unit: &mut Unit, rt: RuntimeFn, bound_bits: u16) -> Result<FuncId> {
    let name = rt.name();
    let sig = rt.signature(bound_bits);
    if unit.find_global(name).is_some() {
        return Err(Error::RuntimeSignature {
            name: name.to_string(),
        });
    }
    if let Some(id) = unit.find_function(name) {
        let func = unit
            .function_mut(id)
            .ok_or_else(|| malformed_error!("dangling function handle {}", id))?;
        if func.sig != sig {
            return Err(Error::RuntimeSignature {
                name: name.to_string(),
            });
        }
        func.runtime = true;
        return Ok(id);
    }
    let mut func = Function::new(name, sig);
    func.runtime = true;
    func.origin = Origin::Instrumentation;
    Ok(unit.add_function(func))
}

/// Runtime declarations of one unit.
#[derive(Debug, Clone)]
pub struct RuntimeDecls {
    decls: HashMap<RuntimeFn, FuncId>,
}

impl RuntimeDecls {
    /// Declares the whole catalogue in `unit`.
    ///
    /// # Errors
    ///
    /// Fails on the first symbol that clashes with an incompatible definition.
    pub fn declare_all(unit: &mut Unit, bound_bits: u16) -> Result<Self> {
        let mut decls = HashMap::with_capacity(RuntimeFn::COUNT);
        for rt in RuntimeFn::iter() {
            decls.insert(rt, declare(unit, rt, bound_bits)?);
        }
        Ok(Self { decls })
    }

    /// Returns the declaration of `rt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeSignature`] when the function was never declared.
    pub fn get(&self, rt: RuntimeFn) -> Result<FuncId> {
        self.decls
            .get(&rt)
            .copied()
            .ok_or_else(|| Error::RuntimeSignature {
                name: rt.name().to_string(),
            })
    }
}
