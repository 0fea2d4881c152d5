//! Compiler options resolved once before a pipeline is built.
//!
//! Options come from three places, in increasing precedence: the defaults,
//! the `SEAGRAPH_OPTIONS` environment variable, and explicit `key=value`
//! pairs (the `-X` style used by embedders). Once resolved the struct is
//! immutable and read without any per-phase cost.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use thiserror::Error;

use crate::opt::worklist::PopOrder;

/// Environment variable holding comma-separated `key=value` options.
pub const OPTIONS_ENV: &str = "SEAGRAPH_OPTIONS";

// =============================================================================
// Option Values
// =============================================================================

/// Where speculation barriers are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpectrePhtBarriers {
    /// No barriers.
    #[default]
    None,
    /// After every branch target.
    AllTargets,
    /// After guard targets only.
    GuardTargets,
}

/// How much of the pipeline is dumped to the registered dump handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DumpLevel {
    #[default]
    None,
    /// After each tier.
    Tiers,
    /// After each phase.
    Phases,
}

/// Errors while parsing options.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("unknown compiler option `{0}`")]
    UnknownOption(String),

    #[error("invalid value `{value}` for option `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: &'static str,
    },
}

// =============================================================================
// Compiler Options
// =============================================================================

/// Complete option set for one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompilerOptions {
    /// Run the canonicalizer phases.
    pub canonicalize: bool,
    /// Turn fixed reads into floating reads in the mid tier.
    pub opt_floating_reads: bool,
    /// Lower floating guards to fixed guards in the mid tier.
    pub guard_lowering: bool,
    /// Speculation barrier placement.
    pub spectre_pht_barriers: SpectrePhtBarriers,
    /// Run dead code elimination phases.
    pub dead_code_elimination: bool,
    /// Verify the graph after every phase.
    pub verify_graphs: bool,
    /// Dump granularity.
    pub dump_level: DumpLevel,
    /// Worklist iteration budget per canonicalizer run (0 picks one from the
    /// graph size).
    pub max_worklist_iterations: usize,
    /// Order in which the canonicalizer worklist is drained.
    pub worklist_order: PopOrder,
    /// Share prepared snippet graphs between compilations.
    pub use_snippet_cache: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            canonicalize: true,
            opt_floating_reads: true,
            guard_lowering: true,
            spectre_pht_barriers: SpectrePhtBarriers::None,
            dead_code_elimination: true,
            verify_graphs: cfg!(debug_assertions),
            dump_level: DumpLevel::None,
            max_worklist_iterations: 0,
            worklist_order: PopOrder::Fifo,
            use_snippet_cache: true,
        }
    }
}

impl CompilerOptions {
    /// Fewest phases: canonicalization and the required cleanup only.
    pub fn minimal() -> Self {
        Self {
            opt_floating_reads: false,
            guard_lowering: false,
            ..Default::default()
        }
    }

    /// Every optional phase, with verification.
    pub fn full() -> Self {
        Self {
            spectre_pht_barriers: SpectrePhtBarriers::GuardTargets,
            verify_graphs: true,
            ..Default::default()
        }
    }

    /// Defaults overridden by `SEAGRAPH_OPTIONS`, if set.
    pub fn from_env() -> Result<Self, OptionError> {
        match std::env::var(OPTIONS_ENV) {
            Ok(text) => Self::parse(&text),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Defaults overridden by a comma-separated `key=value` list.
    pub fn parse(text: &str) -> Result<Self, OptionError> {
        let mut options = Self::default();
        options.apply_str(text)?;
        Ok(options)
    }

    /// Defaults overridden by individual `key=value` items.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, OptionError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut options = Self::default();
        for pair in pairs {
            options.apply_str(pair)?;
        }
        Ok(options)
    }

    /// Apply a comma-separated `key=value` list on top of these options.
    pub fn apply_str(&mut self, text: &str) -> Result<(), OptionError> {
        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = item.split_once('=').unwrap_or((item, "true"));
            self.set(key.trim(), value.trim())?;
        }
        Ok(())
    }

    /// Set one option by name. Names accept `-` or `_` as separators.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), OptionError> {
        let normalized = key.replace('-', "_").to_ascii_lowercase();
        match normalized.as_str() {
            "canonicalize" => self.canonicalize = parse_bool(key, value)?,
            "opt_floating_reads" => self.opt_floating_reads = parse_bool(key, value)?,
            "guard_lowering" => self.guard_lowering = parse_bool(key, value)?,
            "dead_code_elimination" | "dce" => self.dead_code_elimination = parse_bool(key, value)?,
            "verify_graphs" | "verify" => self.verify_graphs = parse_bool(key, value)?,
            "use_snippet_cache" => self.use_snippet_cache = parse_bool(key, value)?,
            "max_worklist_iterations" => {
                self.max_worklist_iterations = value.parse().map_err(|_| OptionError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                    reason: "expected a non-negative integer",
                })?;
            }
            "spectre_pht_barriers" => {
                self.spectre_pht_barriers = match value.to_ascii_lowercase().as_str() {
                    "none" | "off" => SpectrePhtBarriers::None,
                    "all" | "alltargets" | "all_targets" => SpectrePhtBarriers::AllTargets,
                    "guard" | "guardtargets" | "guard_targets" => SpectrePhtBarriers::GuardTargets,
                    _ => return Err(invalid(key, value, "expected none, all_targets or guard_targets")),
                };
            }
            "dump_level" | "dump" => {
                self.dump_level = match value.to_ascii_lowercase().as_str() {
                    "none" | "0" => DumpLevel::None,
                    "tiers" | "1" => DumpLevel::Tiers,
                    "phases" | "2" => DumpLevel::Phases,
                    _ => return Err(invalid(key, value, "expected none, tiers or phases")),
                };
            }
            "worklist_order" => {
                self.worklist_order = match value.to_ascii_lowercase().as_str() {
                    "fifo" => PopOrder::Fifo,
                    "lifo" => PopOrder::Lifo,
                    _ => return Err(invalid(key, value, "expected fifo or lifo")),
                };
            }
            _ => return Err(OptionError::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    /// Stable identity of the option set, used in cache keys.
    pub fn identity(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

fn invalid(key: &str, value: &str, reason: &'static str) -> OptionError {
    OptionError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, OptionError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Ok(true),
        "false" | "off" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

// =============================================================================
// Tests
// =============================================================================
