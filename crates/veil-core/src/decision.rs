//! Decision sources: the seam between the engine and whatever decides.
//!
//! Each turn, the run loop hands a decision source the per-agent
//! observations and awaits a batch of [`Decision`]s in return. The
//! [`DecisionSource`] trait abstracts what sits behind that seam -- an
//! LLM backend, a human player, a scripted sequence, or nothing at all.
//! Sources see observations only, never ground truth, so a source cannot
//! act on more than its agents are allowed to see.
//!
//! Two built-in sources ship in the registry: `idle`, which proposes
//! nothing and lets the engine rules carry the run, and `scripted`, which
//! replays a pre-written sequence of decisions keyed by turn.

use std::collections::BTreeMap;

use tracing::debug;
use veil_observe::Observation;
use veil_types::{AgentId, Decision};

use crate::config::{ConfigError, DecisionConfig, ScriptedTurn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while collecting decisions.
///
/// `Display` and `Error` are implemented by hand: the `source` field is a
/// registry identifier, not an error cause, and `thiserror` would treat
/// any field with that name as the cause.
#[derive(Debug)]
pub enum DecisionError {
    /// The source failed as a whole and produced no batch.
    SourceFailed {
        /// The failing source's registry identifier.
        source: &'static str,
        /// The turn being decided.
        turn: u64,
        /// What went wrong.
        reason: String,
    },
}

impl core::fmt::Display for DecisionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SourceFailed {
                source,
                turn,
                reason,
            } => {
                write!(f, "decision source `{source}` failed at turn {turn}: {reason}")
            }
        }
    }
}

impl std::error::Error for DecisionError {}

// ---------------------------------------------------------------------------
// The source trait
// ---------------------------------------------------------------------------

/// A producer of per-turn decision batches.
///
/// The run loop calls [`collect_decisions`] once per turn, before
/// validation. Returned decisions are proposals: every embedded action
/// still goes through the validator, and rejected ones are dropped
/// without failing the batch. A source that cannot decide for one agent
/// should omit that agent's decisions rather than fail the whole turn.
///
/// [`collect_decisions`]: DecisionSource::collect_decisions
pub trait DecisionSource: core::fmt::Debug {
    /// The registry identifier this source was built from.
    fn name(&self) -> &'static str;

    /// Produce the decisions for `turn`.
    ///
    /// `observations` maps each agent to its filtered view of the state
    /// being decided on. Decision order is submission order: when two
    /// decisions write the same variable, the later one wins.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError`] only when the source fails entirely;
    /// per-agent trouble is handled by omitting that agent's decisions.
    fn collect_decisions(
        &mut self,
        turn: u64,
        observations: &BTreeMap<AgentId, Observation>,
    ) -> Result<Vec<Decision>, DecisionError>;
}

// ---------------------------------------------------------------------------
// Built-in sources
// ---------------------------------------------------------------------------

/// A source that never proposes anything.
///
/// Every turn is carried by the engine rules alone. Useful for pure
/// dynamics runs and as the scaffold while an external backend is wired
/// up.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleDecisionSource;

impl IdleDecisionSource {
    /// Create an idle source.
    pub const fn new() -> Self {
        Self
    }
}

impl DecisionSource for IdleDecisionSource {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn collect_decisions(
        &mut self,
        _turn: u64,
        _observations: &BTreeMap<AgentId, Observation>,
    ) -> Result<Vec<Decision>, DecisionError> {
        Ok(Vec::new())
    }
}

/// A source that replays a pre-written script.
///
/// Decisions are keyed by the turn they are submitted on and handed out
/// exactly once; turns the script does not mention get an empty batch.
/// Scripts drive integration tests and reproducible demo runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecisionSource {
    script: BTreeMap<u64, Vec<Decision>>,
}

impl ScriptedDecisionSource {
    /// Build a source from configured script entries.
    ///
    /// Entries naming the same turn are merged in listing order, so the
    /// script reads top to bottom regardless of how it was grouped.
    pub fn from_turns(turns: Vec<ScriptedTurn>) -> Self {
        let mut script: BTreeMap<u64, Vec<Decision>> = BTreeMap::new();
        for entry in turns {
            script.entry(entry.turn).or_default().extend(entry.decisions);
        }
        Self { script }
    }

    /// How many scripted turns have not been played yet.
    pub fn remaining_turns(&self) -> usize {
        self.script.len()
    }
}

impl DecisionSource for ScriptedDecisionSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn collect_decisions(
        &mut self,
        turn: u64,
        _observations: &BTreeMap<AgentId, Observation>,
    ) -> Result<Vec<Decision>, DecisionError> {
        let decisions = self.script.remove(&turn).unwrap_or_default();
        if !decisions.is_empty() {
            debug!(turn, count = decisions.len(), "Scripted decisions played");
        }
        Ok(decisions)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A source constructor: decisions section in, boxed source out.
type SourceBuilder = fn(&DecisionConfig) -> Box<dyn DecisionSource>;

/// The closed registry of known sources, in listing order.
const REGISTRY: &[(&str, SourceBuilder)] = &[("idle", build_idle), ("scripted", build_scripted)];

/// The known source identifiers, comma separated, for error messages.
pub fn known_decision_sources() -> String {
    REGISTRY
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Construct the configured decision source.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownDecisionSource`] for identifiers outside
/// the registry.
pub fn decision_source_from_config(
    config: &DecisionConfig,
) -> Result<Box<dyn DecisionSource>, ConfigError> {
    let Some((_, builder)) = REGISTRY.iter().find(|(name, _)| *name == config.source) else {
        return Err(ConfigError::UnknownDecisionSource {
            kind: config.source.clone(),
            known: known_decision_sources(),
        });
    };
    Ok(builder(config))
}

fn build_idle(_config: &DecisionConfig) -> Box<dyn DecisionSource> {
    Box::new(IdleDecisionSource::new())
}

fn build_scripted(config: &DecisionConfig) -> Box<dyn DecisionSource> {
    Box::new(ScriptedDecisionSource::from_turns(config.script.clone()))
}
