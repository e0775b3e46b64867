//! Configuration for the instrumentation engine and the entry-point linker.
//!
//! Both structs are plain data with public fields. [`Default`] enables everything the engine
//! knows how to instrument; [`InstrumentConfig::disabled`] turns every optional feature off,
//! which leaves only function entry and exit tracking.

/// Configuration for instrumenting units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentConfig {
    /// Name of the program entry function (default: `"main"`).
    pub entry_point: String,

    /// Integer width loop bounds are materialized at (default: 64).
    ///
    /// Bound expressions wider than this are reported as unknown.
    pub bound_bits: u16,

    /// Emit loop begin, iteration and end calls.
    pub instrument_loops: bool,

    /// Wrap call sites with call begin and end calls.
    pub instrument_calls: bool,

    /// Emit read and write calls for memory accesses.
    pub instrument_memory: bool,

    /// Register stack mirrors of formal parameters.
    pub register_arguments: bool,

    /// Switch instrumented link-once functions to internal linkage.
    pub internalize_link_once: bool,

    /// Run the IR verifier after each unit (slow).
    pub verify: bool,

    /// Linker settings.
    pub link: LinkConfig,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            entry_point: "main".to_string(),
            bound_bits: 64,
            instrument_loops: true,
            instrument_calls: true,
            instrument_memory: true,
            register_arguments: true,
            internalize_link_once: true,
            verify: false,
            link: LinkConfig::default(),
        }
    }
}

impl InstrumentConfig {
    /// Creates a configuration with every feature enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that only tracks function entry and exit.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            instrument_loops: false,
            instrument_calls: false,
            instrument_memory: false,
            register_arguments: false,
            internalize_link_once: false,
            ..Self::default()
        }
    }

    /// Sets the entry function name.
    #[must_use]
    pub fn with_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = name.into();
        self
    }

    /// Sets the loop bound width.
    #[must_use]
    pub fn with_bound_bits(mut self, bits: u16) -> Self {
        self.bound_bits = bits;
        self
    }

    /// Enables or disables loop instrumentation.
    #[must_use]
    pub fn with_loops(mut self, enabled: bool) -> Self {
        self.instrument_loops = enabled;
        self
    }

    /// Enables or disables call-site instrumentation.
    #[must_use]
    pub fn with_calls(mut self, enabled: bool) -> Self {
        self.instrument_calls = enabled;
        self
    }

    /// Enables or disables memory-access instrumentation.
    #[must_use]
    pub fn with_memory(mut self, enabled: bool) -> Self {
        self.instrument_memory = enabled;
        self
    }

    /// Enables or disables parameter mirror registration.
    #[must_use]
    pub fn with_arguments(mut self, enabled: bool) -> Self {
        self.register_arguments = enabled;
        self
    }

    /// Enables or disables verification after each unit.
    #[must_use]
    pub fn with_verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    /// Replaces the linker settings.
    #[must_use]
    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }
}

/// Configuration for the entry-point linker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Largest numeric suffix probed for initializer names (default: `u32::MAX`).
    pub max_suffix: u32,

    /// Prefix of initializer wrapper names (default: `"irprobe.init.module"`).
    pub initializer_base: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_suffix: u32::MAX,
            initializer_base: "irprobe.init.module".to_string(),
        }
    }
}

impl LinkConfig {
    /// Creates the default linker configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest probed suffix.
    #[must_use]
    pub fn with_max_suffix(mut self, max_suffix: u32) -> Self {
        self.max_suffix = max_suffix;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InstrumentConfig::default();
        assert_eq!(config.entry_point, "main");
        assert_eq!(config.bound_bits, 64);
        assert!(config.instrument_loops && config.instrument_calls);
        assert!(!config.verify);
        assert_eq!(config.link.max_suffix, u32::MAX);
        assert_eq!(config.link.initializer_base, "irprobe.init.module");
    }

    #[test]
    fn test_disabled_and_builders() {
        let config = InstrumentConfig::disabled()
            .with_entry_point("start")
            .with_loops(true)
            .with_link(LinkConfig::new().with_max_suffix(3));
        assert_eq!(config.entry_point, "start");
        assert!(config.instrument_loops);
        assert!(!config.instrument_memory);
        assert!(!config.internalize_link_once);
        assert_eq!(config.link.max_suffix, 3);
    }
}
