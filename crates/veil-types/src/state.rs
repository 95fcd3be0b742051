//! Canonical ground-truth state and its immutable-update builders.
//!
//! A [`SimulationState`] is never edited in place. Updates go through the
//! consuming `with_*` builders, which move the old value in and hand a new
//! value back; whoever holds a reference to a previous state keeps seeing
//! it untouched. The variable set of every scope is fixed when the state
//! is first assembled, so the builders update existing names only and fail
//! loudly on anything undeclared.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::AgentId;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by state accessors and update builders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The referenced agent is not part of the state.
    #[error("agent `{agent}` is not part of the simulation state")]
    UnknownAgent {
        /// The unknown agent.
        agent: AgentId,
    },

    /// The referenced variable was never declared for the scope.
    #[error("variable `{variable}` does not exist in scope `{scope}`")]
    UnknownVariable {
        /// Owning scope: an agent name, or `global`.
        scope: String,
        /// The undeclared variable name.
        variable: String,
    },

    /// A numeric operation was attempted on a non-numeric value.
    #[error("variable `{variable}` holds `{kind}`, expected a number")]
    NotNumeric {
        /// The variable that was expected to be numeric.
        variable: String,
        /// The kind actually stored.
        kind: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Reasoning records
// ---------------------------------------------------------------------------

/// One entry of an agent's recorded deliberation.
///
/// Reasoning lives only in ground truth. The observation pipeline never
/// copies it: agents must not see each other's internal deliberation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningRecord {
    /// The turn during which the reasoning was produced.
    pub turn: u64,
    /// The agent that produced it.
    pub agent: AgentId,
    /// Free-form deliberation text from the decision layer.
    pub content: String,
}

impl ReasoningRecord {
    /// Assemble a record.
    pub fn new(turn: u64, agent: AgentId, content: impl Into<String>) -> Self {
        Self {
            turn,
            agent,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// One agent's slice of ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// The agent's configured name.
    pub name: AgentId,
    /// The agent's variables; the name set is fixed by the schema.
    pub variables: BTreeMap<String, Value>,
}

impl AgentState {
    /// Assemble an agent scope.
    pub const fn new(name: AgentId, variables: BTreeMap<String, Value>) -> Self {
        Self { name, variables }
    }

    /// Look up one variable.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// The simulation-wide variable scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    /// Simulation-wide variables; the name set is fixed by the schema.
    pub variables: BTreeMap<String, Value>,
}

impl GlobalState {
    /// Assemble the global scope.
    pub const fn new(variables: BTreeMap<String, Value>) -> Self {
        Self { variables }
    }

    /// Look up one variable.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

// ---------------------------------------------------------------------------
// Ground truth
// ---------------------------------------------------------------------------

/// The single canonical, unfiltered simulation state at one turn.
///
/// Exclusively owned by the turn engine, which is the sole writer of the
/// current reference. Everything else sees either an immutable borrow of
/// this or a derived observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Completed turn count; 0 for the initial state.
    pub turn: u64,
    /// Per-agent scopes, keyed by agent name.
    pub agents: BTreeMap<AgentId, AgentState>,
    /// The simulation-wide scope.
    pub global: GlobalState,
    /// Accumulated deliberation records, in recording order.
    pub reasoning: Vec<ReasoningRecord>,
}

impl SimulationState {
    /// Assemble a turn-0 state with no reasoning recorded.
    pub const fn new(agents: BTreeMap<AgentId, AgentState>, global: GlobalState) -> Self {
        Self {
            turn: 0,
            agents,
            global,
            reasoning: Vec::new(),
        }
    }

    /// Borrow one agent's scope, failing on unknown names.
    pub fn agent(&self, agent: &AgentId) -> Result<&AgentState, StateError> {
        self.agents.get(agent).ok_or_else(|| StateError::UnknownAgent {
            agent: agent.clone(),
        })
    }

    /// Whether the agent participates in this state.
    pub fn has_agent(&self, agent: &AgentId) -> bool {
        self.agents.contains_key(agent)
    }

    /// All agent names, in their stable sorted order.
    pub fn agent_ids(&self) -> impl Iterator<Item = &AgentId> {
        self.agents.keys()
    }

    /// Read an agent variable as a number, failing on unknown or
    /// non-numeric targets.
    pub fn agent_number(&self, agent: &AgentId, variable: &str) -> Result<f64, StateError> {
        let scope = self.agent(agent)?;
        let value = scope
            .variable(variable)
            .ok_or_else(|| StateError::UnknownVariable {
                scope: agent.to_string(),
                variable: variable.to_owned(),
            })?;
        value.as_number().ok_or_else(|| StateError::NotNumeric {
            variable: variable.to_owned(),
            kind: value.kind_name(),
        })
    }

    /// Read a global variable as a number, failing on unknown or
    /// non-numeric targets.
    pub fn global_number(&self, variable: &str) -> Result<f64, StateError> {
        let value = self
            .global
            .variable(variable)
            .ok_or_else(|| StateError::UnknownVariable {
                scope: "global".to_owned(),
                variable: variable.to_owned(),
            })?;
        value.as_number().ok_or_else(|| StateError::NotNumeric {
            variable: variable.to_owned(),
            kind: value.kind_name(),
        })
    }

    /// New state with the turn counter replaced.
    #[must_use]
    pub fn with_turn(mut self, turn: u64) -> Self {
        self.turn = turn;
        self
    }

    /// New state with one agent variable replaced.
    pub fn with_agent_variable(
        mut self,
        agent: &AgentId,
        variable: &str,
        value: Value,
    ) -> Result<Self, StateError> {
        let scope = self
            .agents
            .get_mut(agent)
            .ok_or_else(|| StateError::UnknownAgent {
                agent: agent.clone(),
            })?;
        let slot = scope
            .variables
            .get_mut(variable)
            .ok_or_else(|| StateError::UnknownVariable {
                scope: agent.to_string(),
                variable: variable.to_owned(),
            })?;
        *slot = value;
        Ok(self)
    }

    /// New state with one global variable replaced.
    pub fn with_global_variable(
        mut self,
        variable: &str,
        value: Value,
    ) -> Result<Self, StateError> {
        let slot = self
            .global
            .variables
            .get_mut(variable)
            .ok_or_else(|| StateError::UnknownVariable {
                scope: "global".to_owned(),
                variable: variable.to_owned(),
            })?;
        *slot = value;
        Ok(self)
    }

    /// New state with reasoning records appended in order.
    #[must_use]
    pub fn with_reasoning(mut self, records: Vec<ReasoningRecord>) -> Self {
        self.reasoning.extend(records);
        self
    }
}
