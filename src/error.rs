use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Only the fatal failure classes of the engine are represented here. Everything the engine
/// can degrade from (an unknown loop bound, an unsupported memory access, a unit without an
/// entry point) is reported through the [`crate::events::EventLog`] instead and never surfaces
/// as an `Err`.
///
/// # Error Categories
///
/// ## Invariant Violations
/// - [`Error::Malformed`] - An IR handle or structure did not satisfy an internal invariant
/// - [`Error::Verification`] - The IR verifier rejected an instrumented function
///
/// ## Unit-Local Failures
/// - [`Error::RuntimeSignature`] - A runtime-library symbol exists with an incompatible signature
///
/// ## Link-Time Failures
/// - [`Error::MissingUnitMetadata`] - An instrumented unit lacks a required record
/// - [`Error::NameExhausted`] - No collision-free initializer name could be allocated
/// - [`Error::EntryPointNotFound`] - The requested entry function does not exist
///
/// # Examples
///
/// ```rust,ignore
/// use irprobe::{Engine, Error};
///
/// match engine.link(&mut units) {
///     Ok(report) => println!("pool size {}", report.pool_size),
///     Err(Error::MissingUnitMetadata { unit, what }) => {
///         eprintln!("unit {unit} is missing {what}");
///     }
///     Err(e) => eprintln!("link failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An IR structure is damaged or a handle does not resolve.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A runtime-library function is declared with a signature the engine cannot call.
    ///
    /// The engine looks runtime entry points up by name and inserts a declaration if none
    /// exists. A pre-existing symbol of the same name with a different type means calls
    /// cannot be generated, which stops processing of the unit.
    #[error("Runtime function '{name}' is declared with an incompatible signature")]
    RuntimeSignature {
        /// Name of the offending symbol
        name: String,
    },

    /// An instrumented unit is missing a record the linker needs.
    ///
    /// A partially-instrumented unit would corrupt the shared offset arithmetic for every
    /// unit linked after it, so the whole link step is aborted.
    #[error("Unit '{unit}' is instrumented but has no {what}")]
    MissingUnitMetadata {
        /// Name of the unit
        unit: String,
        /// Description of the missing record
        what: &'static str,
    },

    /// Every numeric suffix for a synthesized initializer name is already taken.
    #[error("No free name is available for '{base}<N>'")]
    NameExhausted {
        /// The name prefix that was probed
        base: String,
    },

    /// The requested program entry function does not exist in any unit.
    #[error("Entry point '{0}' was not found")]
    EntryPointNotFound(String),

    /// The IR verifier found structural or dominance errors.
    #[error("{0}")]
    Verification(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

/// Shorthand for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_macro_records_location() {
        let err = malformed_error!("bad block {}", 7);
        match err {
            Error::Malformed {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "bad block 7");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_display_messages() {
        let err = Error::MissingUnitMetadata {
            unit: "a.c".to_string(),
            what: "pool size",
        };
        assert_eq!(err.to_string(), "Unit 'a.c' is instrumented but has no pool size");

        let err = Error::NameExhausted {
            base: "irprobe.init.module".to_string(),
        };
        assert!(err.to_string().contains("irprobe.init.module<N>"));
    }
}
