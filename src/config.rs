//! Profiler session configuration
//!
//! The host process configures the profiler through environment variables set by the coverage
//! console before the runtime starts. [`ProfilerConfig::from_env`] reads them once at attach time;
//! tests and embedders can use [`ProfilerConfig::from_lookup`] with any key/value source.

use std::str::FromStr;

use crate::{probe::ProbeMode, Error, Result};

/// Probe mode; `oldSchool` selects direct calls
pub const ENV_INSTRUMENTATION: &str = "OpenCover_Profiler_Instrumentation";
/// `true` enables IL listings in the log
pub const ENV_DIAGNOSTICS: &str = "OpenCover_Profiler_Diagnostics";
/// Visit cap per id
pub const ENV_THRESHOLD: &str = "OpenCover_Profiler_Threshold";
/// Any value enables test tracking, which needs safe mode
pub const ENV_TRACE_BY_TEST: &str = "OpenCover_Profiler_TraceByTest";
/// Any value enables safe mode
pub const ENV_SAFE_MODE: &str = "OpenCover_Profiler_SafeMode";

/// Settings of one profiling session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerConfig {
    /// Maximum visits forwarded per id; 0 forwards every visit
    pub threshold: u32,

    /// How probes reach the recorder
    pub probe_mode: ProbeMode,

    /// Forward every visit synchronously instead of buffering
    pub safe_mode: bool,

    /// Log IL listings before and after instrumentation
    pub diagnostics: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            threshold: 0,
            probe_mode: ProbeMode::Cuckoo,
            safe_mode: false,
            diagnostics: false,
        }
    }
}

impl ProfilerConfig {
    /// Direct `calli` probes with no cap; the fastest setup for short runs
    #[must_use]
    pub fn direct() -> Self {
        Self {
            probe_mode: ProbeMode::Direct,
            ..Self::default()
        }
    }

    /// Configuration for troubleshooting a run
    ///
    /// Forwards every visit synchronously and logs every rewritten method.
    #[must_use]
    pub fn diagnostic() -> Self {
        Self {
            safe_mode: true,
            diagnostics: true,
            ..Self::default()
        }
    }

    /// Set the visit threshold
    #[must_use]
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the probe mode
    #[must_use]
    pub fn with_probe_mode(mut self, probe_mode: ProbeMode) -> Self {
        self.probe_mode = probe_mode;
        self
    }

    /// Enable or disable safe mode
    #[must_use]
    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    /// Enable or disable IL listings
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Read the configuration from the process environment
    ///
    /// # Errors
    /// [`Error::Config`] if a numeric value or the probe mode cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration from an arbitrary key/value source.
    ///
    /// Unset and empty values keep their defaults. Flags are switched on by any non-empty value,
    /// except diagnostics which needs the literal `true`. Test tracking switches on safe mode.
    ///
    /// # Errors
    /// [`Error::Config`] if a numeric value or the probe mode cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let mut config = Self::default();

        if let Some(threshold) = value(ENV_THRESHOLD) {
            config.threshold = parse_number(ENV_THRESHOLD, &threshold)?;
        }

        if let Some(mode) = value(ENV_INSTRUMENTATION) {
            config.probe_mode = ProbeMode::from_str(&mode).map_err(|_| Error::Config {
                key: ENV_INSTRUMENTATION,
                message: format!("unknown probe mode '{mode}'"),
            })?;
        }

        config.diagnostics = value(ENV_DIAGNOSTICS).is_some_and(|flag| flag == "true");
        config.safe_mode =
            value(ENV_SAFE_MODE).is_some() || value(ENV_TRACE_BY_TEST).is_some();

        Ok(config)
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<u32> {
    value.trim().parse::<u32>().map_err(|error| Error::Config {
        key,
        message: format!("'{value}' is not a number: {error}"),
    })
}
