//! The run loop: observe, decide, validate, execute, check.
//!
//! [`run_simulation`] drives a [`TurnEngine`] from its initial state to a
//! termination condition, wiring the observation builder, the action
//! validator, and a decision source through the turn cycle. A callback
//! fires after every completed turn so external layers can snapshot or
//! stream progress without the loop knowing about them.
//!
//! Runs without a turn limit are guarded by a safety cap: the loop
//! refuses to run past it, so a configuration with no reachable
//! termination condition still ends.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use veil_observe::{BuildError, Observation, ObservationBuilder};
use veil_types::{Action, AgentId, Decision, ReasoningRecord, RunId, SimulationState};

use crate::config::{ConfigError, SimulationConfig};
use crate::decision::{DecisionError, DecisionSource, decision_source_from_config};
use crate::engine::{EndReason, EngineError, EnginePhase, TurnEngine};
use crate::validator::{ActionValidator, ValidationError, ValidationStats};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that end a run abnormally.
#[derive(Debug, Error)]
pub enum RunError {
    /// The configuration could not produce a runnable setup.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: ConfigError,
    },

    /// A turn failed inside the engine.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: EngineError,
    },

    /// An observation could not be assembled.
    #[error("observation error: {source}")]
    Observation {
        /// The underlying build error.
        #[from]
        source: BuildError,
    },

    /// A submitted action was malformed beyond rejection.
    #[error("validation error: {source}")]
    Validation {
        /// The underlying validation error.
        #[from]
        source: ValidationError,
    },

    /// The decision source failed as a whole.
    #[error("decision error: {source}")]
    Decision {
        /// The underlying decision error.
        #[from]
        source: DecisionError,
    },
}

// ---------------------------------------------------------------------------
// Reports and outcomes
// ---------------------------------------------------------------------------

/// What one completed turn did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReport {
    /// The turn counter after the turn completed.
    pub turn: u64,
    /// Actions proposed by the decision source.
    pub submitted: usize,
    /// Actions that survived validation and were applied.
    pub accepted: usize,
    /// Actions dropped by validation.
    pub rejected: usize,
    /// The termination condition this turn triggered, if any.
    pub end: Option<EndReason>,
}

/// Why and how a run finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    /// The engine's run id.
    pub run_id: RunId,
    /// Turns completed by this call.
    pub turns: u64,
    /// The condition that ended the run.
    pub end: EndReason,
    /// The last completed turn's report; absent when no turn ran.
    pub final_report: Option<TurnReport>,
    /// Cumulative validation counters.
    pub validation: ValidationStats,
}

/// Callback invoked after each completed turn.
///
/// Implementations can snapshot the state, stream reports, or collect
/// metrics. The loop never inspects what they do.
pub trait TurnCallback {
    /// Called once per completed turn, after termination was checked.
    fn on_turn(&mut self, report: &TurnReport, state: &SimulationState);
}

/// A no-op turn callback for callers that only want the outcome.
pub struct NoOpCallback;

impl TurnCallback for NoOpCallback {
    fn on_turn(&mut self, _report: &TurnReport, _state: &SimulationState) {}
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Turns a single [`run_simulation`] call may execute at most.
pub const DEFAULT_SAFETY_CAP: u64 = 10_000;

/// Knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Hard ceiling on turns executed by one call, independent of the
    /// configured termination conditions.
    pub safety_cap: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            safety_cap: DEFAULT_SAFETY_CAP,
        }
    }
}

// ---------------------------------------------------------------------------
// The loop
// ---------------------------------------------------------------------------

/// Run the simulation until a termination condition or the safety cap.
///
/// Initializes the engine if the caller has not, then cycles: build each
/// agent's observation, collect decisions against those observations,
/// validate the proposed actions, record any disclosed reasoning, and
/// execute the turn. The engine checks termination after every turn; an
/// initial state that already meets a condition ends the run before any
/// turn executes.
///
/// # Errors
///
/// Returns [`RunError`] if any stage fails unrecoverably. Rejected
/// actions are not errors; they are dropped and counted.
pub fn run_simulation(
    engine: &mut TurnEngine,
    builder: &ObservationBuilder,
    validator: &mut ActionValidator,
    source: &mut dyn DecisionSource,
    options: &RunOptions,
    callback: &mut dyn TurnCallback,
) -> Result<RunOutcome, RunError> {
    if engine.phase() == EnginePhase::Uninitialized {
        engine.initialize_state()?;
    }

    let run_id = engine.run_id();
    info!(
        %run_id,
        source = source.name(),
        observability = builder.is_enabled(),
        safety_cap = options.safety_cap,
        "Run started"
    );

    let mut turns: u64 = 0;
    let mut last_report: Option<TurnReport> = None;

    loop {
        // A previous call may have already terminated the engine.
        if let Some(reason) = engine.end_reason() {
            let end = reason.clone();
            return Ok(finish(run_id, turns, end, last_report, validator));
        }

        // The initial state can be terminal on its own, before any turn.
        let pre = {
            let state = engine.state()?;
            engine.termination_reason(state)
        };
        if let Some(end) = pre {
            info!(%run_id, turn = turns, %end, "Termination condition met before any turn");
            return Ok(finish(run_id, turns, end, last_report, validator));
        }

        if turns >= options.safety_cap {
            let end = EndReason::SafetyCap {
                cap: options.safety_cap,
            };
            warn!(%run_id, cap = options.safety_cap, "Safety cap reached");
            return Ok(finish(run_id, turns, end, last_report, validator));
        }

        // --- Observe ---
        let turn = engine.state()?.turn;
        let observations = build_observations(builder, engine.state()?)?;

        // --- Decide ---
        let decisions = source.collect_decisions(turn, &observations)?;
        let (proposals, records) = split_decisions(turn, decisions);
        let submitted = proposals.len();

        // --- Validate ---
        let accepted = validator.validate_actions(&proposals, engine.state()?)?;
        let accepted_count = accepted.len();

        // --- Execute ---
        engine.record_reasoning(records)?;
        let turn_after = engine.run_turn(&accepted)?.turn;
        turns = turns.saturating_add(1);

        let report = TurnReport {
            turn: turn_after,
            submitted,
            accepted: accepted_count,
            rejected: submitted.saturating_sub(accepted_count),
            end: engine.end_reason().cloned(),
        };
        callback.on_turn(&report, engine.state()?);

        if let Some(end) = report.end.clone() {
            return Ok(finish(run_id, turns, end, Some(report), validator));
        }
        last_report = Some(report);
    }
}

/// Build and run a simulation from configuration alone.
///
/// Wires the engine, observation builder, validator, and decision source
/// the configuration describes, then hands them to [`run_simulation`].
///
/// # Errors
///
/// Returns [`RunError`] if construction or the run fails.
pub fn run_from_config(
    config: &SimulationConfig,
    options: &RunOptions,
    callback: &mut dyn TurnCallback,
) -> Result<RunOutcome, RunError> {
    let mut engine = TurnEngine::from_config(config)?;
    let builder = config.observation_builder()?;
    let mut validator = ActionValidator::from_config(config);
    let mut source = decision_source_from_config(&config.decisions)?;
    run_simulation(
        &mut engine,
        &builder,
        &mut validator,
        source.as_mut(),
        options,
        callback,
    )
}

fn build_observations(
    builder: &ObservationBuilder,
    state: &SimulationState,
) -> Result<BTreeMap<AgentId, Observation>, BuildError> {
    state
        .agent_ids()
        .map(|observer| {
            let view = builder.build(observer, state)?;
            Ok((observer.clone(), view))
        })
        .collect()
}

/// Split decisions into the actions to validate and the reasoning to
/// record. Undisclosed rationales produce no record.
fn split_decisions(turn: u64, decisions: Vec<Decision>) -> (Vec<Action>, Vec<ReasoningRecord>) {
    let mut actions = Vec::with_capacity(decisions.len());
    let mut records = Vec::new();
    for decision in decisions {
        if let Some(rationale) = decision.rationale {
            records.push(ReasoningRecord::new(
                turn,
                decision.action.agent.clone(),
                rationale,
            ));
        }
        actions.push(decision.action);
    }
    (actions, records)
}

fn finish(
    run_id: RunId,
    turns: u64,
    end: EndReason,
    final_report: Option<TurnReport>,
    validator: &ActionValidator,
) -> RunOutcome {
    info!(%run_id, turns, %end, "Run finished");
    RunOutcome {
        run_id,
        turns,
        end,
        final_report,
        validation: validator.stats(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::decision::IdleDecisionSource;

    fn parse(yaml: &str) -> SimulationConfig {
        SimulationConfig::parse(yaml).unwrap()
    }

    fn two_agent_yaml(extra: &str) -> String {
        format!(
            "
agents:
  - name: alice
    variables:
      gold:
        kind: number
        initial: 50
  - name: bob
    variables:
      gold:
        kind: number
        initial: 5
{extra}"
        )
    }

    #[test]
    fn bounded_by_max_turns() {
        let config = parse(&two_agent_yaml(
            "termination:
  max_turns: 3
",
        ));
        let outcome = run_from_config(&config, &RunOptions::default(), &mut NoOpCallback).unwrap();

        assert_eq!(outcome.turns, 3);
        assert_eq!(outcome.end, EndReason::TurnLimit { max_turns: 3 });
        assert_eq!(outcome.final_report.as_ref().map(|report| report.turn), Some(3));
    }

    #[test]
    fn terminal_initial_state_runs_no_turns() {
        let config = parse(&two_agent_yaml(
            "termination:
  max_turns: 0
",
        ));
        let outcome = run_from_config(&config, &RunOptions::default(), &mut NoOpCallback).unwrap();

        assert_eq!(outcome.turns, 0);
        assert_eq!(outcome.end, EndReason::TurnLimit { max_turns: 0 });
        assert!(outcome.final_report.is_none());
    }

    #[test]
    fn safety_cap_stops_unbounded_runs() {
        let config = parse(&two_agent_yaml(""));
        let options = RunOptions { safety_cap: 4 };
        let outcome = run_from_config(&config, &options, &mut NoOpCallback).unwrap();

        assert_eq!(outcome.turns, 4);
        assert_eq!(outcome.end, EndReason::SafetyCap { cap: 4 });
    }

    #[test]
    fn turn_callback_fires_once_per_turn() {
        struct CountCallback {
            count: u64,
            last_turn: u64,
        }
        impl TurnCallback for CountCallback {
            fn on_turn(&mut self, report: &TurnReport, state: &SimulationState) {
                self.count = self.count.saturating_add(1);
                self.last_turn = report.turn;
                assert_eq!(report.turn, state.turn);
            }
        }

        let config = parse(&two_agent_yaml(
            "termination:
  max_turns: 3
",
        ));
        let mut callback = CountCallback {
            count: 0,
            last_turn: 0,
        };
        let _ = run_from_config(&config, &RunOptions::default(), &mut callback).unwrap();

        assert_eq!(callback.count, 3);
        assert_eq!(callback.last_turn, 3);
    }

    #[test]
    fn scripted_decisions_flow_through_to_state() {
        let config = parse(&two_agent_yaml(
            "termination:
  max_turns: 1
decisions:
  source: scripted
  script:
    - turn: 0
      decisions:
        - agent: alice
          action: transfer
          variable: gold
          to: bob
          amount: 10
          rationale: evening the odds
",
        ));

        let mut engine = TurnEngine::from_config(&config).unwrap();
        let builder = config.observation_builder().unwrap();
        let mut validator = ActionValidator::from_config(&config);
        let mut source = decision_source_from_config(&config.decisions).unwrap();

        let outcome = run_simulation(
            &mut engine,
            &builder,
            &mut validator,
            source.as_mut(),
            &RunOptions::default(),
            &mut NoOpCallback,
        )
        .unwrap();

        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.validation.accepted, 1);
        assert_eq!(outcome.validation.rejected, 0);

        let state = engine.state().unwrap();
        assert_eq!(state.agent_number(&AgentId::from("alice"), "gold").unwrap(), 40.0);
        assert_eq!(state.agent_number(&AgentId::from("bob"), "gold").unwrap(), 15.0);
        // The disclosed rationale was recorded as reasoning.
        assert_eq!(state.reasoning.len(), 1);
        assert_eq!(state.reasoning.first().unwrap().content, "evening the odds");
    }

    #[test]
    fn rejected_actions_are_counted_not_fatal() {
        let config = parse(&two_agent_yaml(
            "termination:
  max_turns: 1
decisions:
  source: scripted
  script:
    - turn: 0
      decisions:
        - agent: alice
          action: adjust_variable
          variable: charisma
          delta: 1
",
        ));
        let outcome = run_from_config(&config, &RunOptions::default(), &mut NoOpCallback).unwrap();

        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.validation.accepted, 0);
        assert_eq!(outcome.validation.rejected, 1);
        let report = outcome.final_report.unwrap();
        assert_eq!(report.submitted, 1);
        assert_eq!(report.rejected, 1);
    }

    #[test]
    fn rerunning_a_terminated_engine_returns_the_same_end() {
        let config = parse(&two_agent_yaml(
            "termination:
  max_turns: 2
",
        ));
        let mut engine = TurnEngine::from_config(&config).unwrap();
        let builder = config.observation_builder().unwrap();
        let mut validator = ActionValidator::from_config(&config);
        let mut source = IdleDecisionSource::new();

        let first = run_simulation(
            &mut engine,
            &builder,
            &mut validator,
            &mut source,
            &RunOptions::default(),
            &mut NoOpCallback,
        )
        .unwrap();
        assert_eq!(first.turns, 2);

        let second = run_simulation(
            &mut engine,
            &builder,
            &mut validator,
            &mut source,
            &RunOptions::default(),
            &mut NoOpCallback,
        )
        .unwrap();
        assert_eq!(second.turns, 0);
        assert_eq!(second.end, EndReason::TurnLimit { max_turns: 2 });
    }
}
