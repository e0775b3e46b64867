//! Source-level debug information attached to IR entities.

use std::fmt;

/// A source position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugLoc {
    /// Source file path.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number (0 when unknown).
    pub col: u32,
}

impl DebugLoc {
    /// Creates a new source position.
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for DebugLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// A source-level variable (local, parameter or global).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiVariable {
    /// Declared name.
    pub name: String,
    /// Declaring file.
    pub file: String,
    /// Declaration line.
    pub line: u32,
    /// 1-based parameter position for formal parameters.
    pub arg: Option<u32>,
}

impl DiVariable {
    /// Describes a local or global variable.
    pub fn new(name: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            line,
            arg: None,
        }
    }

    /// Describes a formal parameter at the given 1-based position.
    pub fn parameter(name: impl Into<String>, file: impl Into<String>, line: u32, arg: u32) -> Self {
        Self {
            arg: Some(arg),
            ..Self::new(name, file, line)
        }
    }

    /// Returns `true` if this variable is a formal parameter.
    #[must_use]
    pub fn is_parameter(&self) -> bool {
        self.arg.is_some()
    }
}

/// A source-level function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiSubprogram {
    /// Source name of the function.
    pub name: String,
    /// Declaring file.
    pub file: String,
    /// Declaration line.
    pub line: u32,
}

impl DiSubprogram {
    /// Creates a new subprogram record.
    pub fn new(name: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            line,
        }
    }
}
