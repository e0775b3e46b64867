//! Translation units: the functions and globals of one independently compiled source file.

use std::fmt;

use crate::ir::{DiVariable, FuncId, Function, FunctionType, GlobalId, IrType, Linkage, Origin};

/// Static initializer of a global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalInit {
    /// Declared here, defined in another unit.
    External,
    /// Zero-initialized.
    Zero,
    /// Integer scalar.
    Int(i64),
    /// Integer array of the given element width.
    IntArray {
        /// Element width in bits
        bits: u16,
        /// Element values
        values: Vec<i64>,
    },
    /// NUL-terminated byte string.
    Str(String),
}

/// A global variable.
#[derive(Debug, Clone)]
pub struct Global {
    /// Symbol name.
    pub name: String,
    /// Value type; the global's address is a pointer to it.
    pub ty: IrType,
    /// Static initializer.
    pub init: GlobalInit,
    /// Symbol linkage.
    pub linkage: Linkage,
    /// Provenance tag.
    pub origin: Origin,
    /// Read-only data.
    pub constant: bool,
    /// Source variable, if known.
    pub debug: Option<DiVariable>,
}

impl Global {
    /// Creates an external, mutable user global.
    pub fn new(name: impl Into<String>, ty: IrType, init: GlobalInit) -> Self {
        Self {
            name: name.into(),
            ty,
            init,
            linkage: Linkage::External,
            origin: Origin::User,
            constant: false,
            debug: None,
        }
    }

    /// Creates an internal constant global tagged as instrumentation-internal.
    pub fn synthetic(name: impl Into<String>, ty: IrType, init: GlobalInit) -> Self {
        Self {
            linkage: Linkage::Internal,
            origin: Origin::Instrumentation,
            constant: true,
            ..Self::new(name, ty, init)
        }
    }

    /// Returns `true` for declarations of globals defined elsewhere.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.init == GlobalInit::External
    }
}

/// Instrumentation record of a unit.
///
/// Written by the instrumentation engine when a unit is processed and consumed by the
/// entry-point linker. Every field is optional so that a damaged record can be detected and
/// reported instead of silently corrupting the merged numbering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitInstrumentation {
    /// Number of metadata identifiers the unit allocated.
    pub pool_size: Option<u64>,
    /// Function storing every descriptor into the pool.
    pub describe_fn: Option<FuncId>,
    /// Function shifting local type ids and declaring them to the runtime.
    pub type_fixup: Option<FuncId>,
    /// Number of types the unit registered.
    pub type_count: Option<u64>,
    /// Function registering the unit's globals, absent when there are none.
    pub register_globals: Option<FuncId>,
    /// Initializer wrapper synthesized by the linker.
    pub initializer: Option<FuncId>,
}

/// One independently compiled translation unit.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Unit name, used in diagnostics.
    pub name: String,
    /// Path of the main source file.
    pub source_file: String,
    /// Instrumentation record, set once the engine processed the unit.
    pub instrumentation: Option<UnitInstrumentation>,
    functions: Vec<Function>,
    globals: Vec<Global>,
}

impl Unit {
    /// Creates an empty unit.
    pub fn new(name: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_file: source_file.into(),
            instrumentation: None,
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Adds a function and returns its handle.
    pub fn add_function(&mut self, func: Function) -> FuncId {
        let id = FuncId::new(self.functions.len());
        self.functions.push(func);
        id
    }

    /// Adds a global and returns its handle.
    pub fn add_global(&mut self, global: Global) -> GlobalId {
        let id = GlobalId::new(self.globals.len());
        self.globals.push(global);
        id
    }

    /// Returns a function by handle.
    #[must_use]
    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    /// Returns a mutable function by handle.
    pub fn function_mut(&mut self, id: FuncId) -> Option<&mut Function> {
        self.functions.get_mut(id.index())
    }

    /// Iterates over functions with their handles.
    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId::new(i), f))
    }

    /// Returns the number of functions.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Returns a global by handle.
    #[must_use]
    pub fn global(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(id.index())
    }

    /// Returns a mutable global by handle.
    pub fn global_mut(&mut self, id: GlobalId) -> Option<&mut Global> {
        self.globals.get_mut(id.index())
    }

    /// Iterates over globals with their handles.
    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId::new(i), g))
    }

    /// Returns the number of globals.
    #[must_use]
    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Looks up a function by symbol name.
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(FuncId::new)
    }

    /// Looks up a global by symbol name.
    #[must_use]
    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(GlobalId::new)
    }

    /// Returns `true` if any function or global uses `name`.
    #[must_use]
    pub fn has_symbol(&self, name: &str) -> bool {
        self.find_function(name).is_some() || self.find_global(name).is_some()
    }

    /// Returns the function named `name`, declaring it with `sig` when absent.
    ///
    /// An existing function is returned as-is; callers that care about the signature must
    /// check it.
    pub fn get_or_insert_function(&mut self, name: &str, sig: FunctionType) -> FuncId {
        if let Some(id) = self.find_function(name) {
            return id;
        }
        self.add_function(Function::new(name, sig))
    }

    /// Returns the global named `name`, adding `make()` when absent.
    pub fn get_or_insert_global(&mut self, name: &str, make: impl FnOnce() -> Global) -> GlobalId {
        if let Some(id) = self.find_global(name) {
            return id;
        }
        self.add_global(make())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; unit {} ({})", self.name, self.source_file)?;
        for (id, global) in self.globals() {
            let kind = if global.constant { "constant" } else { "global" };
            write!(
                f,
                "{id} = {} {kind} {} @{}",
                global.linkage, global.ty, global.name
            )?;
            match &global.init {
                GlobalInit::External => {}
                GlobalInit::Zero => write!(f, " zeroinit")?,
                GlobalInit::Int(v) => write!(f, " {v}")?,
                GlobalInit::IntArray { values, .. } => write!(f, " {values:?}")?,
                GlobalInit::Str(s) => write!(f, " {s:?}")?,
            }
            writeln!(f)?;
        }
        for (id, func) in self.functions() {
            write!(f, "; {id}\n{func}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_get_or_insert() {
        let mut unit = Unit::new("a", "a.c");
        let main = unit.add_function(Function::new(
            "main",
            FunctionType::new(IrType::I32, vec![]),
        ));
        assert_eq!(unit.find_function("main"), Some(main));
        assert_eq!(
            unit.get_or_insert_function("main", FunctionType::new(IrType::Void, vec![])),
            main
        );

        let decl = unit.get_or_insert_function("puts", FunctionType::new(IrType::I32, vec![IrType::Ptr]));
        assert_ne!(decl, main);
        assert!(unit.function(decl).unwrap().is_declaration());
        assert!(unit.has_symbol("puts"));
    }

    #[test]
    fn test_synthetic_global() {
        let mut unit = Unit::new("a", "a.c");
        let g = unit.get_or_insert_global("s", || {
            Global::synthetic("s", IrType::array(IrType::I8, 3), GlobalInit::Str("ab".into()))
        });
        let again = unit.get_or_insert_global("s", || Global::new("s", IrType::I32, GlobalInit::Zero));
        assert_eq!(g, again);
        let global = unit.global(g).unwrap();
        assert!(global.constant);
        assert_eq!(global.linkage, Linkage::Internal);
        assert!(global.origin.is_instrumentation());
    }

    #[test]
    fn test_display_lists_globals_and_functions() {
        let mut unit = Unit::new("a", "a.c");
        unit.add_global(Global::new("x", IrType::I32, GlobalInit::Int(7)));
        unit.add_function(Function::new("f", FunctionType::new(IrType::Void, vec![])));
        let text = unit.to_string();
        assert!(text.contains("@g0 = external global i32 @x 7"));
        assert!(text.contains("declare external void @f()"));
    }
}
