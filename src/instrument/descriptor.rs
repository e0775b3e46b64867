//! Descriptor strings handed to the runtime with every metadata identifier.
//!
//! A descriptor is a run of `key=value*` fields closed by one extra `*`:
//!
//! ```text
//! type=var_name*vtype=3*file=a.c*line1=4*name1=x**
//! ```
//!
//! Values containing `*` are written length-prefixed as `key#LEN=value*`, where `LEN` is the
//! value's byte length. A reader takes exactly `LEN` bytes after `=` regardless of their
//! content, so arbitrary file paths and expression text survive intact.

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    ir::{DebugLoc, DiSubprogram, DiVariable},
    Result,
};

/// Entity kind named by the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum EntityKind {
    /// A function.
    #[strum(serialize = "function")]
    Function,
    /// A sequential loop.
    #[strum(serialize = "seqloop")]
    SeqLoop,
    /// A scalar variable.
    #[strum(serialize = "var_name")]
    Variable,
    /// An array.
    #[strum(serialize = "arr_name")]
    Array,
    /// A source position.
    #[strum(serialize = "file_name")]
    File,
}

/// Incremental descriptor writer.
#[derive(Debug, Clone)]
pub struct Descriptor {
    text: String,
}

impl Descriptor {
    /// Starts a descriptor with its `type` field.
    #[must_use]
    pub fn new(kind: EntityKind) -> Self {
        let mut desc = Self {
            text: String::new(),
        };
        desc.push("type", <&'static str>::from(kind));
        desc
    }

    fn push(&mut self, key: &str, value: &str) {
        self.text.push_str(key);
        if value.contains('*') {
            self.text.push_str(&format!("#{}", value.len()));
        }
        self.text.push('=');
        self.text.push_str(value);
        self.text.push('*');
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, key: &str, value: impl ToString) -> Self {
        self.push(key, &value.to_string());
        self
    }

    /// Appends a field when `value` is present.
    #[must_use]
    pub fn opt_field(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    /// Closes the descriptor.
    #[must_use]
    pub fn finish(mut self) -> String {
        self.text.push('*');
        self.text
    }
}

/// Splits a descriptor into its `(key, value)` fields.
///
/// # Errors
///
/// Returns an error if a field has no `=`, a length prefix is not a number or overruns the
/// input, or the closing `*` is missing.
pub fn parse(text: &str) -> Result<Vec<(String, String)>> {
    let mut fields = Vec::new();
    let mut rest = text;
    loop {
        if rest == "*" {
            return Ok(fields);
        }
        if rest.is_empty() {
            return Err(malformed_error!("descriptor '{}' is not terminated", text));
        }
        let eq = rest
            .find('=')
            .ok_or_else(|| malformed_error!("field without '=' in '{}'", text))?;
        let head = &rest[..eq];
        let after = &rest[eq + 1..];
        let (key, value, tail) = match head.split_once('#') {
            Some((key, len)) => {
                let len: usize = len
                    .parse()
                    .map_err(|_| malformed_error!("bad length prefix '{}' in '{}'", len, text))?;
                let value = after
                    .get(..len)
                    .ok_or_else(|| malformed_error!("length prefix overruns '{}'", text))?;
                (key, value, &after[len..])
            }
            None => {
                let end = after
                    .find('*')
                    .ok_or_else(|| malformed_error!("unterminated field in '{}'", text))?;
                (head, &after[..end], &after[end..])
            }
        };
        rest = tail
            .strip_prefix('*')
            .ok_or_else(|| malformed_error!("missing field separator in '{}'", text))?;
        fields.push((key.to_string(), value.to_string()));
    }
}

/// Descriptor of a known source position. A zero column is omitted.
#[must_use]
pub fn location(loc: &DebugLoc) -> String {
    Descriptor::new(EntityKind::File)
        .field("file", &loc.file)
        .field("line1", loc.line)
        .opt_field("col1", (loc.col != 0).then_some(loc.col))
        .finish()
}

/// Descriptor of the reserved "unknown location" identifier.
#[must_use]
pub fn unknown_location(source_file: &str) -> String {
    Descriptor::new(EntityKind::File)
        .field("file", source_file)
        .finish()
}

/// Descriptor of a function.
///
/// Without a subprogram the symbol name (if any) and the unit's source file are used.
#[must_use]
pub fn function(
    symbol: Option<&str>,
    subprogram: Option<&DiSubprogram>,
    source_file: &str,
    ret_type: u64,
    param_count: usize,
) -> String {
    let desc = Descriptor::new(EntityKind::Function);
    let desc = match subprogram {
        Some(sp) => desc.field("file", &sp.file),
        None => desc.field("file", source_file),
    };
    let desc = desc.field("vtype", ret_type).field("rank", param_count);
    match subprogram {
        Some(sp) => desc.field("line1", sp.line).field("name1", &sp.name),
        None => desc.opt_field("name1", symbol),
    }
    .finish()
}

/// Descriptor of a variable.
///
/// `rank` is the array rank, 0 for scalars. `elem_type` is the type id of the innermost
/// element type for arrays and of the value type for scalars.
#[must_use]
pub fn variable(var: Option<&DiVariable>, source_file: &str, rank: u32, elem_type: u64) -> String {
    let desc = if rank > 0 {
        Descriptor::new(EntityKind::Array).field("rank", rank)
    } else {
        Descriptor::new(EntityKind::Variable)
    }
    .field("vtype", elem_type);
    match var {
        Some(var) => desc
            .field("file", &var.file)
            .field("line1", var.line)
            .field("name1", &var.name),
        None => desc.field("file", source_file),
    }
    .finish()
}

/// Descriptor of a loop with its bounds mask and source range.
#[must_use]
pub fn seq_loop(
    source_file: &str,
    bounds: u32,
    start: Option<&DebugLoc>,
    end: Option<&DebugLoc>,
) -> String {
    let file = start.or(end).map_or(source_file, |loc| loc.file.as_str());
    let mut desc = Descriptor::new(EntityKind::SeqLoop)
        .field("file", file)
        .field("bounds", bounds);
    for loc in [start, end].into_iter().flatten() {
        desc = desc.field("line1", loc.line).field("col1", loc.col);
    }
    desc.finish()
}
