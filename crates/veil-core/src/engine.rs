//! The turn engine: lifecycle, phase functions, and atomic turn execution.
//!
//! The engine is the sole writer of canonical ground truth. It moves
//! through four phases -- uninitialized, initialized, running, terminated
//! -- and exposes the turn cycle both as one atomic [`run_turn`] step and
//! as the pure phase functions it composes, so callers can inspect
//! intermediate states without executing a turn.
//!
//! A turn either completes fully or leaves the canonical state untouched:
//! phases fold owned copies, and the engine commits the result only after
//! every phase has succeeded.
//!
//! [`run_turn`]: TurnEngine::run_turn

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use veil_types::{
    Action, ActionKind, ObserveTarget, ReasoningRecord, RunId, SimulationState, StateError, Value,
};

use crate::config::{
    BoundScope, ConfigError, SchemaIndex, SimulationConfig, TerminationConfig, TrackedBound,
};
use crate::rules::{self, EngineRule};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by engine lifecycle and turn execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A state-dependent operation ran before `initialize_state`.
    #[error("engine is not initialized; call initialize_state first")]
    NotInitialized,

    /// `initialize_state` was called a second time.
    #[error("engine is already initialized; initial state is created once")]
    AlreadyInitialized,

    /// A turn was requested after the run ended.
    #[error("engine is terminated; the run is over")]
    Terminated,

    /// The turn counter cannot be advanced any further.
    #[error("turn counter overflow at turn {turn}")]
    TurnOverflow {
        /// The turn at which the counter saturated.
        turn: u64,
    },

    /// A state update inside a phase failed.
    #[error("state update failed: {source}")]
    State {
        /// The underlying state error.
        #[from]
        source: StateError,
    },
}

// ---------------------------------------------------------------------------
// Phases and end reasons
// ---------------------------------------------------------------------------

/// The engine lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Constructed; no state exists yet.
    Uninitialized,
    /// Initial state assembled; no turn has run.
    Initialized,
    /// At least one turn has run.
    Running,
    /// A termination condition fired; no further turns run.
    Terminated,
}

impl EnginePhase {
    /// The stable lowercase identifier, for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Terminated => "terminated",
        }
    }
}

impl core::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EndReason {
    /// The configured turn limit was reached.
    TurnLimit {
        /// The configured limit.
        max_turns: u64,
    },

    /// A tracked variable left its configured window.
    OutOfBounds {
        /// The scope holding the breaching value: an agent name, or
        /// `global`.
        scope: String,
        /// The tracked variable.
        variable: String,
        /// The breaching value.
        value: f64,
        /// The window's lower edge, if declared.
        min: Option<f64>,
        /// The window's upper edge, if declared.
        max: Option<f64>,
    },

    /// A run loop's safety cap fired on an unbounded configuration.
    /// Never produced by the engine itself.
    SafetyCap {
        /// The cap that fired.
        cap: u64,
    },
}

impl core::fmt::Display for EndReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TurnLimit { max_turns } => write!(f, "turn limit {max_turns} reached"),
            Self::OutOfBounds {
                scope,
                variable,
                value,
                ..
            } => write!(f, "`{variable}` in scope `{scope}` left its window at {value}"),
            Self::SafetyCap { cap } => write!(f, "safety cap {cap} reached"),
        }
    }
}

// ---------------------------------------------------------------------------
// The engine
// ---------------------------------------------------------------------------

/// Drives a simulation through its turns.
///
/// Construction resolves and validates everything the run needs; once an
/// engine exists, configuration problems are behind it. The engine holds
/// the canonical [`SimulationState`] and hands out immutable borrows
/// only.
#[derive(Debug)]
pub struct TurnEngine {
    run_id: RunId,
    name: String,
    schema: SchemaIndex,
    rules: Vec<Box<dyn EngineRule>>,
    termination: TerminationConfig,
    phase: EnginePhase,
    state: Option<SimulationState>,
    ended: Option<EndReason>,
}

impl TurnEngine {
    /// Build an engine from a validated config, stamping a fresh run id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config fails validation or names an
    /// engine rule the registry cannot construct.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let schema = config.schema_index();
        let rules = rules::build_rules(&config.rules, &schema)?;
        Ok(Self {
            run_id: RunId::new(),
            name: config.simulation.name.clone(),
            schema,
            rules,
            termination: config.termination.clone(),
            phase: EnginePhase::Uninitialized,
            state: None,
            ended: None,
        })
    }

    /// The id stamped at construction.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The current lifecycle phase.
    pub const fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Why the run ended, once it has.
    pub const fn end_reason(&self) -> Option<&EndReason> {
        self.ended.as_ref()
    }

    /// The variable declarations this engine was built from.
    pub const fn schema(&self) -> &SchemaIndex {
        &self.schema
    }

    /// Borrow the canonical state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before `initialize_state`.
    pub fn state(&self) -> Result<&SimulationState, EngineError> {
        self.state.as_ref().ok_or(EngineError::NotInitialized)
    }

    /// Assemble the turn-0 state from the schema. Callable exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyInitialized`] on any later call.
    pub fn initialize_state(&mut self) -> Result<&SimulationState, EngineError> {
        if self.phase != EnginePhase::Uninitialized {
            return Err(EngineError::AlreadyInitialized);
        }
        let state = self.schema.initial_state();
        info!(
            run_id = %self.run_id,
            simulation = %self.name,
            agents = state.agents.len(),
            "Simulation initialized"
        );
        self.phase = EnginePhase::Initialized;
        Ok(self.state.insert(state))
    }

    /// Apply validated actions to a state copy, in submission order.
    ///
    /// Unvalidated actions and actions from agents the state does not
    /// hold are skipped with a warning; they never mutate anything. Later
    /// actions see the writes of earlier ones, so two writes to the same
    /// variable resolve to the last one.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::State`] when a validated action references
    /// a variable its agent does not hold. The input state is untouched.
    pub fn apply_actions(
        &self,
        actions: &[Action],
        state: &SimulationState,
    ) -> Result<SimulationState, EngineError> {
        let mut next = state.clone();
        for action in actions {
            if !action.validated {
                warn!(
                    agent = %action.agent,
                    action = action.kind.identifier(),
                    "Skipping unvalidated action"
                );
                continue;
            }
            if !next.has_agent(&action.agent) {
                warn!(agent = %action.agent, "Skipping action from unknown agent");
                continue;
            }
            next = Self::apply_one(next, action)?;
        }
        Ok(next)
    }

    /// Fold a state copy through the configured rules, in declaration
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::State`] if a rule fails; the input state is
    /// untouched.
    pub fn apply_engine_rules(
        &self,
        state: &SimulationState,
    ) -> Result<SimulationState, EngineError> {
        let mut next = state.clone();
        for rule in &self.rules {
            next = rule.apply(next)?;
            debug!(rule = rule.name(), turn = next.turn, "Engine rule applied");
        }
        Ok(next)
    }

    /// Whether `state` meets any configured termination condition.
    pub fn check_termination(&self, state: &SimulationState) -> bool {
        self.termination_reason(state).is_some()
    }

    /// The first termination condition `state` meets, if any.
    ///
    /// The turn limit is checked first, then tracked bounds in
    /// declaration order; within an agent-scoped bound, agents are
    /// checked in name order.
    pub fn termination_reason(&self, state: &SimulationState) -> Option<EndReason> {
        if let Some(max_turns) = self.termination.max_turns
            && state.turn >= max_turns
        {
            return Some(EndReason::TurnLimit { max_turns });
        }
        self.termination
            .bounds
            .iter()
            .find_map(|bound| Self::bound_breach(bound, state))
    }

    /// Record deliberation produced while deciding the current turn.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before `initialize_state`.
    pub fn record_reasoning(&mut self, records: Vec<ReasoningRecord>) -> Result<(), EngineError> {
        if records.is_empty() {
            return Ok(());
        }
        let current = self.state.take().ok_or(EngineError::NotInitialized)?;
        self.state = Some(current.with_reasoning(records));
        Ok(())
    }

    /// Execute one full turn from the accepted actions.
    ///
    /// Applies the actions, folds the engine rules, advances the turn
    /// counter, and commits the result as the new canonical state. When
    /// the new state meets a termination condition the engine terminates
    /// itself; later calls fail with [`EngineError::Terminated`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the engine is not initialized, already
    /// terminated, the turn counter would overflow, or a phase fails. On
    /// any error the canonical state is the one from before the call.
    pub fn run_turn(&mut self, accepted: &[Action]) -> Result<&SimulationState, EngineError> {
        match self.phase {
            EnginePhase::Uninitialized => return Err(EngineError::NotInitialized),
            EnginePhase::Terminated => return Err(EngineError::Terminated),
            EnginePhase::Initialized | EnginePhase::Running => {}
        }
        let current = self.state.as_ref().ok_or(EngineError::NotInitialized)?;
        let turn = current.turn;

        let after_actions = self.apply_actions(accepted, current)?;
        let after_rules = self.apply_engine_rules(&after_actions)?;
        let next_turn = turn
            .checked_add(1)
            .ok_or(EngineError::TurnOverflow { turn })?;
        let next = after_rules.with_turn(next_turn);

        info!(
            run_id = %self.run_id,
            turn = next_turn,
            actions = accepted.len(),
            "Turn completed"
        );

        if let Some(reason) = self.termination_reason(&next) {
            info!(run_id = %self.run_id, turn = next_turn, %reason, "Simulation terminated");
            self.phase = EnginePhase::Terminated;
            self.ended = Some(reason);
        } else {
            self.phase = EnginePhase::Running;
        }
        Ok(self.state.insert(next))
    }

    fn apply_one(state: SimulationState, action: &Action) -> Result<SimulationState, StateError> {
        match &action.kind {
            ActionKind::Wait => Ok(state),
            ActionKind::SetVariable { variable, value } => {
                state.with_agent_variable(&action.agent, variable, value.clone())
            }
            ActionKind::AdjustVariable { variable, delta } => {
                let current = state.agent_number(&action.agent, variable)?;
                state.with_agent_variable(&action.agent, variable, Value::Number(current + delta))
            }
            ActionKind::Transfer {
                variable,
                to,
                amount,
            } => {
                if !state.has_agent(to) {
                    warn!(
                        agent = %action.agent,
                        recipient = %to,
                        "Skipping transfer to unknown recipient"
                    );
                    return Ok(state);
                }
                let sender = state.agent_number(&action.agent, variable)?;
                let recipient = state.agent_number(to, variable)?;
                let state = state.with_agent_variable(
                    &action.agent,
                    variable,
                    Value::Number(sender - amount),
                )?;
                state.with_agent_variable(to, variable, Value::Number(recipient + amount))
            }
        }
    }

    fn bound_breach(bound: &TrackedBound, state: &SimulationState) -> Option<EndReason> {
        match bound.scope {
            BoundScope::Agents => {
                for (id, agent) in &state.agents {
                    if let Some(value) = agent.variable(&bound.variable).and_then(Value::as_number)
                        && !bound.contains(value)
                    {
                        return Some(EndReason::OutOfBounds {
                            scope: id.to_string(),
                            variable: bound.variable.clone(),
                            value,
                            min: bound.min,
                            max: bound.max,
                        });
                    }
                }
                None
            }
            BoundScope::Global => {
                let value = state
                    .global
                    .variable(&bound.variable)
                    .and_then(Value::as_number)?;
                (!bound.contains(value)).then(|| EndReason::OutOfBounds {
                    scope: ObserveTarget::GLOBAL_NAME.to_owned(),
                    variable: bound.variable.clone(),
                    value,
                    min: bound.min,
                    max: bound.max,
                })
            }
        }
    }
}
