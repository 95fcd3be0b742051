//! Observability vocabulary: levels, targets, entries, and the default.
//!
//! These types describe *who can see whom, and how well*. The matrix that
//! answers lookups lives in `veil-observe`; this module only defines the
//! configuration-facing shapes.

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// How much of a target an observer can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservabilityLevel {
    /// The target is entirely absent from the observation.
    Unaware,
    /// Only externally classified variables are visible.
    External,
    /// Every variable is visible.
    Insider,
}

impl ObservabilityLevel {
    /// Lowercase level name, matching the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unaware => "unaware",
            Self::External => "external",
            Self::Insider => "insider",
        }
    }
}

impl core::fmt::Display for ObservabilityLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// What a matrix entry points at: one agent, or the simulation-wide scope.
///
/// Serialized as the agent's name, or the sentinel string `global`. An
/// agent may therefore never be named `global`; configuration validation
/// rejects that name before a matrix is ever built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObserveTarget {
    /// One agent's variable scope.
    Agent(AgentId),
    /// The simulation-wide variable scope.
    Global,
}

impl ObserveTarget {
    /// The sentinel name reserved for the global scope.
    pub const GLOBAL_NAME: &'static str = "global";

    /// The target as a string slice: the agent name, or the sentinel.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Agent(id) => id.as_str(),
            Self::Global => Self::GLOBAL_NAME,
        }
    }
}

impl core::fmt::Display for ObserveTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ObserveTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ObserveTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name == Self::GLOBAL_NAME {
            Ok(Self::Global)
        } else {
            Ok(Self::Agent(AgentId::from(name)))
        }
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One explicit (observer, target) assignment.
///
/// Absent noise means zero noise for this pair; the default fallback is
/// pair-granular, so an explicit entry never inherits the default's noise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityEntry {
    /// The observing agent.
    pub observer: AgentId,
    /// The observed agent, or the global scope.
    pub target: ObserveTarget,
    /// Visibility depth for this pair.
    pub level: ObservabilityLevel,
    /// Multiplicative noise factor in `[0, ..)`; absent means none.
    #[serde(default)]
    pub noise: Option<f64>,
}

/// The fallback applied when no explicit entry covers a pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefaultObservability {
    /// Visibility depth for uncovered pairs.
    #[serde(default = "default_level")]
    pub level: ObservabilityLevel,
    /// Noise factor for uncovered pairs; absent means none.
    #[serde(default)]
    pub noise: Option<f64>,
}

/// Uncovered pairs see external variables unless configured otherwise.
const fn default_level() -> ObservabilityLevel {
    ObservabilityLevel::External
}

impl Default for DefaultObservability {
    fn default() -> Self {
        Self {
            level: default_level(),
            noise: None,
        }
    }
}
