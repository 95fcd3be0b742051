//! Per-agent observation assembly.
//!
//! An [`Observation`] is what one agent gets to see of ground truth: the
//! matrix decides *whether* and *how deep* each target is visible, the
//! filter decides *which variables* survive, and the noise generator
//! decides *how precisely*. The builder composes the three. It holds no
//! mutable state, so observations for every agent of a turn can be built
//! independently, in any order, from the same snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use veil_types::{
    AgentId, AgentState, GlobalState, ObservabilityLevel, ObserveTarget, ReasoningRecord,
    SimulationState, Value, VisibilityPolicy,
};

use crate::filter::filter_variables;
use crate::matrix::{Fidelity, ObservabilityMatrix};
use crate::noise::{NoiseKey, perturb};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while assembling an observation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The observer is not part of the ground-truth state.
    #[error("observer `{observer}` is not part of the simulation state")]
    UnknownObserver {
        /// The unknown observer name.
        observer: AgentId,
    },
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// One agent's filtered, noised view of ground truth.
///
/// Shape-parallel to [`SimulationState`] so external layers can persist or
/// template it the same way, but deliberately a distinct type: an
/// observation is never authoritative, and the compiler stops it from being
/// fed back into the engine as canonical state. Its `reasoning` is empty in
/// every path -- an agent must never see deliberation, its own included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// The turn this view was derived from.
    pub turn: u64,
    /// Visible agents only; unaware targets are absent, not blanked.
    pub agents: BTreeMap<AgentId, AgentState>,
    /// The visible slice of the global scope.
    pub global: GlobalState,
    /// Always empty; present so the shape mirrors ground truth.
    pub reasoning: Vec<ReasoningRecord>,
}

impl Observation {
    /// Look up a visible agent.
    pub fn agent(&self, agent: &AgentId) -> Option<&AgentState> {
        self.agents.get(agent)
    }

    /// Whether the observer can see the given agent at all.
    pub fn sees(&self, agent: &AgentId) -> bool {
        self.agents.contains_key(agent)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles per-agent observations from ground truth.
///
/// Read-only after construction and safe to share across threads within a
/// turn; every build is a pure function of (observer, snapshot, this
/// configuration).
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    matrix: Option<ObservabilityMatrix>,
    policy: VisibilityPolicy,
}

impl ObservationBuilder {
    /// A builder with observability disabled: every agent sees everything.
    ///
    /// This is the back-compatibility mode for configurations that predate
    /// the visibility model.
    pub const fn disabled() -> Self {
        Self {
            matrix: None,
            policy: VisibilityPolicy {
                external: std::collections::BTreeSet::new(),
                internal: std::collections::BTreeSet::new(),
            },
        }
    }

    /// A builder enforcing the given matrix and classification.
    pub const fn new(matrix: ObservabilityMatrix, policy: VisibilityPolicy) -> Self {
        Self {
            matrix: Some(matrix),
            policy,
        }
    }

    /// Whether a matrix is enforced at all.
    pub const fn is_enabled(&self) -> bool {
        self.matrix.is_some()
    }

    /// Assemble `observer`'s view of `truth`.
    ///
    /// With observability disabled this is a full copy of every agent and
    /// every variable. Otherwise each candidate target (every agent plus
    /// the global scope) is resolved through the matrix, filtered by level,
    /// and noised per variable under the (turn, observer, target, variable)
    /// key. Ground truth is never written to.
    pub fn build(
        &self,
        observer: &AgentId,
        truth: &SimulationState,
    ) -> Result<Observation, BuildError> {
        if !truth.has_agent(observer) {
            return Err(BuildError::UnknownObserver {
                observer: observer.clone(),
            });
        }

        let observation = self.matrix.as_ref().map_or_else(
            || Observation {
                turn: truth.turn,
                agents: truth.agents.clone(),
                global: truth.global.clone(),
                reasoning: Vec::new(),
            },
            |matrix| self.assemble(matrix, observer, truth),
        );

        debug!(
            %observer,
            turn = observation.turn,
            visible_agents = observation.agents.len(),
            "Observation assembled"
        );
        Ok(observation)
    }

    /// Matrix-enforced assembly over every candidate target.
    fn assemble(
        &self,
        matrix: &ObservabilityMatrix,
        observer: &AgentId,
        truth: &SimulationState,
    ) -> Observation {
        let mut agents = BTreeMap::new();
        for (id, scope) in &truth.agents {
            let target = ObserveTarget::Agent(id.clone());
            let fidelity = matrix.fidelity(observer, &target);
            if fidelity.level == ObservabilityLevel::Unaware {
                trace!(%observer, target = %id, "Target omitted: unaware");
                continue;
            }
            let variables =
                self.observe_variables(truth.turn, observer, &target, &scope.variables, fidelity);
            agents.insert(id.clone(), AgentState::new(id.clone(), variables));
        }

        let target = ObserveTarget::Global;
        let fidelity = matrix.fidelity(observer, &target);
        let global = if fidelity.level == ObservabilityLevel::Unaware {
            // An unaware global target means no global variables visible.
            GlobalState::default()
        } else {
            GlobalState::new(self.observe_variables(
                truth.turn,
                observer,
                &target,
                &truth.global.variables,
                fidelity,
            ))
        };

        Observation {
            turn: truth.turn,
            agents,
            global,
            reasoning: Vec::new(),
        }
    }

    /// Filter one target's variables, then noise each numeric survivor.
    fn observe_variables(
        &self,
        turn: u64,
        observer: &AgentId,
        target: &ObserveTarget,
        variables: &BTreeMap<String, Value>,
        fidelity: Fidelity,
    ) -> BTreeMap<String, Value> {
        let filtered = filter_variables(variables, fidelity.level, &self.policy);
        if fidelity.noise <= 0.0 {
            return filtered;
        }

        filtered
            .into_iter()
            .map(|(name, value)| {
                let key = NoiseKey {
                    turn,
                    observer,
                    target,
                    variable: &name,
                };
                let observed = perturb(&value, fidelity.noise, &key);
                (name, observed)
            })
            .collect()
    }
}
