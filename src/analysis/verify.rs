//! IR verifier: structural and dominance checks.
//!
//! Collects all errors rather than stopping at the first one. The engine runs it after
//! instrumenting a unit when verification is enabled, so that broken CFG surgery is caught
//! where it happens instead of in a downstream consumer.

use std::fmt;

use crate::{
    analysis::Dominance,
    ir::{BlockId, Callee, FuncId, Function, InstId, Op, Unit, ValueDef, ValueId},
};

/// Location context for a verification error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Unit-level problem.
    Unit(String),
    /// Function-level problem.
    Function(String),
    /// Problem with one block.
    Block(String, BlockId),
    /// Problem with one instruction.
    Instruction(String, BlockId, InstId),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Unit(name) => write!(f, "unit {name}"),
            Location::Function(name) => write!(f, "func @{name}"),
            Location::Block(name, block) => write!(f, "func @{name}, {block}"),
            Location::Instruction(name, block, inst) => {
                write!(f, "func @{name}, {block}, {inst}")
            }
        }
    }
}

/// A single verification error.
#[derive(Debug, Clone)]
pub struct VerifyError {
    /// Where the problem was found.
    pub location: Location,
    /// What is wrong.
    pub message: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.location, self.message)
    }
}

/// Collected verification results.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Every error found.
    pub errors: Vec<VerifyError>,
}

impl VerifyResult {
    /// Returns `true` when no error was found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, location: Location, message: impl Into<String>) {
        self.errors.push(VerifyError {
            location,
            message: message.into(),
        });
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "verification passed");
        }
        writeln!(
            f,
            "verification failed with {} error(s):",
            self.errors.len()
        )?;
        for e in &self.errors {
            writeln!(f, "  {e}")?;
        }
        Ok(())
    }
}

struct FuncVerifier<'a> {
    unit: &'a Unit,
    func: &'a Function,
    dom: Dominance,
    result: &'a mut VerifyResult,
}

impl FuncVerifier<'_> {
    fn inst_loc(&self, block: BlockId, inst: InstId) -> Location {
        Location::Instruction(self.func.name.clone(), block, inst)
    }

    fn block_loc(&self, block: BlockId) -> Location {
        Location::Block(self.func.name.clone(), block)
    }

    fn run(&mut self) {
        if self.func.is_declaration() {
            return;
        }
        if self.func.entry().is_none() {
            self.result.error(
                Location::Function(self.func.name.clone()),
                "function has blocks but no entry",
            );
            return;
        }
        let func = self.func;
        for block in func.blocks() {
            self.verify_block(block.id());
        }
    }

    fn verify_block(&mut self, block: BlockId) {
        let func = self.func;
        let Some(data) = func.block(block) else {
            return;
        };
        let insts = data.insts().to_vec();
        if insts.is_empty() {
            self.result.error(self.block_loc(block), "empty block");
            return;
        }
        let mut seen_non_phi = false;
        for (index, &inst) in insts.iter().enumerate() {
            let Some(op) = func.op(inst) else {
                self.result
                    .error(self.block_loc(block), format!("dangling instruction {inst}"));
                continue;
            };
            let is_last = index + 1 == insts.len();
            if op.is_terminator() != is_last {
                let message = if is_last {
                    "block does not end with a terminator"
                } else {
                    "terminator in the middle of a block"
                };
                self.result.error(self.inst_loc(block, inst), message);
            }
            if op.is_phi() {
                if seen_non_phi {
                    self.result
                        .error(self.inst_loc(block, inst), "phi after non-phi instruction");
                }
                self.verify_phi(block, inst, op);
            } else {
                seen_non_phi = true;
                for value in op.uses() {
                    self.verify_use(block, inst, value);
                }
            }
            for succ in op.successors() {
                if func.block(succ).is_none() {
                    self.result
                        .error(self.inst_loc(block, inst), format!("unknown target {succ}"));
                }
            }
            if let Op::Call {
                callee: Callee::Direct(callee),
                args,
                ..
            } = op
            {
                self.verify_call(block, inst, *callee, args.len());
            }
        }
    }

    fn verify_use(&mut self, block: BlockId, inst: InstId, value: ValueId) {
        match self.func.value_def(value) {
            None => self
                .result
                .error(self.inst_loc(block, inst), format!("unknown value {value}")),
            Some(ValueDef::Inst(def)) => {
                if !self.func.inst(def).is_some_and(|i| i.is_live()) {
                    self.result.error(
                        self.inst_loc(block, inst),
                        format!("{value} is defined by an erased instruction"),
                    );
                } else if self.dom.is_reachable(block)
                    && !self.dom.value_dominates(self.func, value, inst)
                {
                    self.result.error(
                        self.inst_loc(block, inst),
                        format!("{value} does not dominate its use"),
                    );
                }
            }
            Some(ValueDef::Global(global)) if self.unit.global(global).is_none() => self
                .result
                .error(self.inst_loc(block, inst), format!("unknown global {global}")),
            Some(ValueDef::Function(func)) if self.unit.function(func).is_none() => self
                .result
                .error(self.inst_loc(block, inst), format!("unknown function {func}")),
            Some(_) => {}
        }
    }

    fn verify_phi(&mut self, block: BlockId, inst: InstId, op: &Op) {
        let Op::Phi { incoming, .. } = op else {
            return;
        };
        let preds = self.func.predecessors(block);
        for (pred, value) in incoming {
            if !preds.contains(pred) {
                self.result.error(
                    self.inst_loc(block, inst),
                    format!("phi incoming block {pred} is not a predecessor"),
                );
                continue;
            }
            if self.func.value_def(*value).is_none() {
                self.result
                    .error(self.inst_loc(block, inst), format!("unknown value {value}"));
            } else if self.dom.is_reachable(*pred)
                && !self.dom.value_available_at_end(self.func, *value, *pred)
            {
                self.result.error(
                    self.inst_loc(block, inst),
                    format!("{value} is not available at the end of {pred}"),
                );
            }
        }
        for pred in preds {
            if !incoming.iter().any(|(p, _)| *p == pred) {
                self.result.error(
                    self.inst_loc(block, inst),
                    format!("phi has no incoming value for {pred}"),
                );
            }
        }
    }

    fn verify_call(&mut self, block: BlockId, inst: InstId, callee: FuncId, argc: usize) {
        match self.unit.function(callee) {
            None => self
                .result
                .error(self.inst_loc(block, inst), format!("unknown callee {callee}")),
            Some(target) if target.sig.params.len() != argc => self.result.error(
                self.inst_loc(block, inst),
                format!(
                    "@{} expects {} argument(s), got {argc}",
                    target.name,
                    target.sig.params.len()
                ),
            ),
            Some(_) => {}
        }
    }
}

/// Verifies one function of `unit`.
pub fn verify_function(unit: &Unit, func: &Function, result: &mut VerifyResult) {
    let mut verifier = FuncVerifier {
        unit,
        func,
        dom: Dominance::of(func),
        result,
    };
    verifier.run();
}

/// Verifies every function of a unit.
#[must_use]
pub fn verify_unit(unit: &Unit) -> VerifyResult {
    let mut result = VerifyResult::default();
    for (_, func) in unit.functions() {
        verify_function(unit, func, &mut result);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, FunctionType, InsertPoint, Instruction, IrType, Origin};

    #[test]
    fn test_well_formed_function_passes() {
        let mut unit = Unit::new("u", "u.c");
        let mut func = Function::new("f", FunctionType::new(IrType::I32, vec![IrType::I32]));
        let x = func.param(0).unwrap();
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::User);
        b.switch_to_block(entry);
        let y = b.add(x, x, Origin::User).unwrap();
        b.ret(Some(y), Origin::User).unwrap();
        unit.add_function(func);

        let result = verify_unit(&unit);
        assert!(result.is_ok(), "{result}");
    }

    #[test]
    fn test_use_before_def_is_reported() {
        let mut unit = Unit::new("u", "u.c");
        let mut func = Function::new("f", FunctionType::new(IrType::I32, vec![IrType::I32]));
        let x = func.param(0).unwrap();
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::User);
        b.switch_to_block(entry);
        let y = b.add(x, x, Origin::User).unwrap();
        b.ret(Some(y), Origin::User).unwrap();
        // z = y * y placed before y's definition
        let add = func.defining_inst(y).unwrap();
        func.insert_value(InsertPoint::Before(add), IrType::I32, Origin::User, None, |dest| {
            Op::Binary {
                dest,
                op: crate::ir::BinaryOp::Mul,
                left: y,
                right: y,
            }
        })
        .unwrap();
        unit.add_function(func);

        let result = verify_unit(&unit);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].message.contains("does not dominate"));
    }

    #[test]
    fn test_missing_terminator_and_bad_call() {
        let mut unit = Unit::new("u", "u.c");
        let callee = unit.add_function(Function::new(
            "g",
            FunctionType::new(IrType::Void, vec![IrType::I32]),
        ));
        let mut func = Function::new("f", FunctionType::new(IrType::Void, vec![]));
        let entry = func.add_block(Origin::User);
        func.insert(
            InsertPoint::End(entry),
            Instruction::new(Op::Call {
                dest: None,
                callee: Callee::Direct(callee),
                args: vec![],
            }),
        )
        .unwrap();
        unit.add_function(func);

        let result = verify_unit(&unit);
        assert_eq!(result.errors.len(), 2);
        assert!(result.to_string().contains("expects 1 argument(s), got 0"));
        assert!(result.to_string().contains("does not end with a terminator"));
    }
}
