//! The semantic gate between proposed and applied actions.
//!
//! Validation distinguishes two failure families. A *malformed* submission
//! (an actor or transfer recipient the simulation does not know) is the
//! caller's bug and raises [`ValidationError`]. A structurally sound action
//! that merely violates the rules (undeclared variable, kind mismatch,
//! out-of-bounds result, insufficient balance) is *rejected*: reported as
//! `false`, counted, and logged, never raised.
//!
//! The per-action check is pure and never touches the proposal. The batch
//! entry point [`ActionValidator::validate_actions`] is the only place
//! that counts outcomes and stamps accepted copies.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use veil_types::{Action, ActionKind, AgentId, SimulationState, Value, VariableKind};

use crate::config::{SchemaIndex, SimulationConfig};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised for structurally malformed submissions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The acting agent is not part of the simulation.
    #[error("action references unknown acting agent `{agent}`")]
    UnknownActor {
        /// The unknown actor.
        agent: AgentId,
    },

    /// A transfer names a recipient that is not part of the simulation.
    #[error("transfer from `{agent}` references unknown recipient `{recipient}`")]
    UnknownRecipient {
        /// The acting agent.
        agent: AgentId,
        /// The unknown recipient.
        recipient: AgentId,
    },
}

/// Why an action failed the semantic checks. Internal; surfaces only in
/// rejection logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    UndeclaredVariable,
    KindMismatch,
    NotNumeric,
    NonFinite,
    OutOfBounds,
    NonPositiveAmount,
    SelfTransfer,
    InsufficientBalance,
}

impl Rejection {
    const fn as_str(self) -> &'static str {
        match self {
            Self::UndeclaredVariable => "undeclared variable",
            Self::KindMismatch => "value kind does not match declaration",
            Self::NotNumeric => "variable is not numeric",
            Self::NonFinite => "value is not finite",
            Self::OutOfBounds => "result violates declared bounds",
            Self::NonPositiveAmount => "transfer amount must be positive",
            Self::SelfTransfer => "transfer to self",
            Self::InsufficientBalance => "insufficient balance",
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Lifetime accept/reject counters of one validator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationStats {
    /// Actions accepted since construction.
    pub accepted: u32,
    /// Actions rejected since construction.
    pub rejected: u32,
    /// Accepted over total; 0 when nothing has been validated yet.
    pub acceptance_rate: f64,
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Checks proposed actions against the schema and the current state.
#[derive(Debug, Clone)]
pub struct ActionValidator {
    schema: SchemaIndex,
    accepted: u32,
    rejected: u32,
}

impl ActionValidator {
    /// A validator for the given declarations, with zeroed counters.
    pub const fn new(schema: SchemaIndex) -> Self {
        Self {
            schema,
            accepted: 0,
            rejected: 0,
        }
    }

    /// A validator for a config's declarations.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.schema_index())
    }

    /// Check one proposal without counting or annotating anything.
    ///
    /// `Ok(true)` means the action would be accepted, `Ok(false)` that it
    /// violates a rule.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the submission is malformed: the
    /// actor, or a transfer recipient, is not part of the simulation.
    pub fn validate_action(
        &self,
        action: &Action,
        state: &SimulationState,
    ) -> Result<bool, ValidationError> {
        Ok(self.evaluate(action, state)?.is_none())
    }

    /// Validate a batch in submission order, returning stamped copies of
    /// the accepted actions and counting every outcome.
    ///
    /// The submitted proposals are never mutated; acceptance produces
    /// fresh copies through [`Action::approved`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] on the first malformed submission.
    pub fn validate_actions(
        &mut self,
        actions: &[Action],
        state: &SimulationState,
    ) -> Result<Vec<Action>, ValidationError> {
        let mut accepted = Vec::with_capacity(actions.len());
        for action in actions {
            match self.evaluate(action, state)? {
                None => {
                    self.accepted = self.accepted.saturating_add(1);
                    accepted.push(action.approved(Utc::now()));
                }
                Some(rejection) => {
                    self.rejected = self.rejected.saturating_add(1);
                    debug!(
                        agent = %action.agent,
                        action = action.kind.identifier(),
                        reason = rejection.as_str(),
                        "Action rejected"
                    );
                }
            }
        }
        Ok(accepted)
    }

    /// The counters so far.
    pub fn stats(&self) -> ValidationStats {
        let total = self.accepted.saturating_add(self.rejected);
        let acceptance_rate = if total == 0 {
            0.0
        } else {
            f64::from(self.accepted) / f64::from(total)
        };
        ValidationStats {
            accepted: self.accepted,
            rejected: self.rejected,
            acceptance_rate,
        }
    }

    /// The full check: `None` passes, `Some` carries the rejection.
    fn evaluate(
        &self,
        action: &Action,
        state: &SimulationState,
    ) -> Result<Option<Rejection>, ValidationError> {
        if !state.has_agent(&action.agent) {
            return Err(ValidationError::UnknownActor {
                agent: action.agent.clone(),
            });
        }
        let verdict = match &action.kind {
            ActionKind::Wait => None,
            ActionKind::SetVariable { variable, value } => {
                self.check_set(&action.agent, variable, value)
            }
            ActionKind::AdjustVariable { variable, delta } => {
                self.check_adjust(&action.agent, variable, *delta, state)
            }
            ActionKind::Transfer {
                variable,
                to,
                amount,
            } => {
                if !state.has_agent(to) {
                    return Err(ValidationError::UnknownRecipient {
                        agent: action.agent.clone(),
                        recipient: to.clone(),
                    });
                }
                self.check_transfer(&action.agent, variable, to, *amount, state)
            }
        };
        Ok(verdict)
    }

    fn check_set(&self, agent: &AgentId, variable: &str, value: &Value) -> Option<Rejection> {
        let Some(spec) = self.schema.agent_spec(agent, variable) else {
            return Some(Rejection::UndeclaredVariable);
        };
        if !spec.kind.admits(value) {
            return Some(Rejection::KindMismatch);
        }
        if let Some(number) = value.as_number() {
            if !number.is_finite() {
                return Some(Rejection::NonFinite);
            }
            if let Some(bounds) = spec.bounds
                && !bounds.contains(number)
            {
                return Some(Rejection::OutOfBounds);
            }
        }
        None
    }

    fn check_adjust(
        &self,
        agent: &AgentId,
        variable: &str,
        delta: f64,
        state: &SimulationState,
    ) -> Option<Rejection> {
        let Some(spec) = self.schema.agent_spec(agent, variable) else {
            return Some(Rejection::UndeclaredVariable);
        };
        if spec.kind != VariableKind::Number {
            return Some(Rejection::NotNumeric);
        }
        if !delta.is_finite() {
            return Some(Rejection::NonFinite);
        }
        let Ok(current) = state.agent_number(agent, variable) else {
            return Some(Rejection::UndeclaredVariable);
        };
        let result = current + delta;
        if !result.is_finite() {
            return Some(Rejection::NonFinite);
        }
        if let Some(bounds) = spec.bounds
            && !bounds.contains(result)
        {
            return Some(Rejection::OutOfBounds);
        }
        None
    }

    fn check_transfer(
        &self,
        agent: &AgentId,
        variable: &str,
        to: &AgentId,
        amount: f64,
        state: &SimulationState,
    ) -> Option<Rejection> {
        if to == agent {
            return Some(Rejection::SelfTransfer);
        }
        if !amount.is_finite() {
            return Some(Rejection::NonFinite);
        }
        if amount <= 0.0 {
            return Some(Rejection::NonPositiveAmount);
        }
        let Some(sender_spec) = self.schema.agent_spec(agent, variable) else {
            return Some(Rejection::UndeclaredVariable);
        };
        let Some(recipient_spec) = self.schema.agent_spec(to, variable) else {
            return Some(Rejection::UndeclaredVariable);
        };
        if sender_spec.kind != VariableKind::Number
            || recipient_spec.kind != VariableKind::Number
        {
            return Some(Rejection::NotNumeric);
        }
        let Ok(sender_balance) = state.agent_number(agent, variable) else {
            return Some(Rejection::UndeclaredVariable);
        };
        let Ok(recipient_balance) = state.agent_number(to, variable) else {
            return Some(Rejection::UndeclaredVariable);
        };
        if sender_balance < amount {
            return Some(Rejection::InsufficientBalance);
        }
        let sender_after = sender_balance - amount;
        let recipient_after = recipient_balance + amount;
        if let Some(bounds) = sender_spec.bounds
            && !bounds.contains(sender_after)
        {
            return Some(Rejection::OutOfBounds);
        }
        if let Some(bounds) = recipient_spec.bounds
            && !bounds.contains(recipient_after)
        {
            return Some(Rejection::OutOfBounds);
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn make_config() -> SimulationConfig {
        let yaml = "
agents:
  - name: alice
    variables:
      energy:
        kind: number
        initial: 10
        bounds: {min: 0, max: 100}
      gold:
        kind: number
        initial: 50
        bounds: {min: 0}
      motto:
        kind: text
        initial: onward
  - name: bob
    variables:
      gold:
        kind: number
        initial: 5
        bounds: {min: 0, max: 10}
";
        SimulationConfig::parse(yaml).unwrap()
    }

    fn make_fixture() -> (ActionValidator, SimulationState) {
        let config = make_config();
        let state = config.schema_index().initial_state();
        (ActionValidator::from_config(&config), state)
    }

    fn action(agent: &str, kind: ActionKind) -> Action {
        Action::new(AgentId::from(agent), kind)
    }

    #[test]
    fn wait_always_passes() {
        let (validator, state) = make_fixture();
        let verdict = validator
            .validate_action(&action("alice", ActionKind::Wait), &state)
            .unwrap();
        assert!(verdict);
    }

    #[test]
    fn unknown_actor_is_malformed_not_rejected() {
        let (validator, state) = make_fixture();
        let err = validator
            .validate_action(&action("ghost", ActionKind::Wait), &state)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownActor {
                agent: AgentId::from("ghost"),
            }
        );
    }

    #[test]
    fn accepted_actions_come_back_stamped() {
        let (mut validator, state) = make_fixture();
        let proposal = action(
            "alice",
            ActionKind::SetVariable {
                variable: "energy".to_owned(),
                value: Value::Number(42.0),
            },
        );
        let accepted = validator.validate_actions(&[proposal.clone()], &state).unwrap();

        assert_eq!(accepted.len(), 1);
        let stamped = accepted.first().unwrap();
        assert!(stamped.validated);
        assert!(stamped.validated_at.is_some());
        // The submitted proposal is untouched.
        assert!(!proposal.validated);
        assert_eq!(validator.stats().accepted, 1);
    }

    #[test]
    fn undeclared_variables_are_rejected() {
        let (validator, state) = make_fixture();
        let verdict = validator
            .validate_action(
                &action(
                    "alice",
                    ActionKind::SetVariable {
                        variable: "charisma".to_owned(),
                        value: Value::Number(1.0),
                    },
                ),
                &state,
            )
            .unwrap();
        assert!(!verdict);
    }

    #[test]
    fn kind_mismatches_are_rejected() {
        let (validator, state) = make_fixture();
        let verdict = validator
            .validate_action(
                &action(
                    "alice",
                    ActionKind::SetVariable {
                        variable: "energy".to_owned(),
                        value: Value::Text("plenty".to_owned()),
                    },
                ),
                &state,
            )
            .unwrap();
        assert!(!verdict);
    }

    #[test]
    fn out_of_bounds_results_are_rejected() {
        let (validator, state) = make_fixture();
        let set = action(
            "alice",
            ActionKind::SetVariable {
                variable: "energy".to_owned(),
                value: Value::Number(250.0),
            },
        );
        let adjust = action(
            "alice",
            ActionKind::AdjustVariable {
                variable: "energy".to_owned(),
                delta: -11.0,
            },
        );
        assert!(!validator.validate_action(&set, &state).unwrap());
        assert!(!validator.validate_action(&adjust, &state).unwrap());

        // The same adjust within bounds passes.
        let fine = action(
            "alice",
            ActionKind::AdjustVariable {
                variable: "energy".to_owned(),
                delta: -10.0,
            },
        );
        assert!(validator.validate_action(&fine, &state).unwrap());
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let (validator, state) = make_fixture();
        let set = action(
            "alice",
            ActionKind::SetVariable {
                variable: "gold".to_owned(),
                value: Value::Number(f64::NAN),
            },
        );
        let adjust = action(
            "alice",
            ActionKind::AdjustVariable {
                variable: "gold".to_owned(),
                delta: f64::INFINITY,
            },
        );
        assert!(!validator.validate_action(&set, &state).unwrap());
        assert!(!validator.validate_action(&adjust, &state).unwrap());
    }

    #[test]
    fn transfers_check_both_sides() {
        let (validator, state) = make_fixture();

        let good = action(
            "alice",
            ActionKind::Transfer {
                variable: "gold".to_owned(),
                to: AgentId::from("bob"),
                amount: 5.0,
            },
        );
        assert!(validator.validate_action(&good, &state).unwrap());

        // Recipient would exceed their max bound of 10.
        let overflow = action(
            "alice",
            ActionKind::Transfer {
                variable: "gold".to_owned(),
                to: AgentId::from("bob"),
                amount: 8.0,
            },
        );
        assert!(!validator.validate_action(&overflow, &state).unwrap());

        // Sender holds only 5.
        let broke = action(
            "bob",
            ActionKind::Transfer {
                variable: "gold".to_owned(),
                to: AgentId::from("alice"),
                amount: 6.0,
            },
        );
        assert!(!validator.validate_action(&broke, &state).unwrap());
    }

    #[test]
    fn self_transfers_and_non_positive_amounts_are_rejected() {
        let (validator, state) = make_fixture();
        let to_self = action(
            "alice",
            ActionKind::Transfer {
                variable: "gold".to_owned(),
                to: AgentId::from("alice"),
                amount: 1.0,
            },
        );
        let nothing = action(
            "alice",
            ActionKind::Transfer {
                variable: "gold".to_owned(),
                to: AgentId::from("bob"),
                amount: 0.0,
            },
        );
        assert!(!validator.validate_action(&to_self, &state).unwrap());
        assert!(!validator.validate_action(&nothing, &state).unwrap());
    }

    #[test]
    fn transfer_to_unknown_recipient_is_malformed() {
        let (validator, state) = make_fixture();
        let err = validator
            .validate_action(
                &action(
                    "alice",
                    ActionKind::Transfer {
                        variable: "gold".to_owned(),
                        to: AgentId::from("ghost"),
                        amount: 1.0,
                    },
                ),
                &state,
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownRecipient { .. }));
    }

    #[test]
    fn stats_track_the_acceptance_rate() {
        let (mut validator, state) = make_fixture();
        assert_eq!(validator.stats().acceptance_rate, 0.0);

        let batch = vec![
            action("alice", ActionKind::Wait),
            action("bob", ActionKind::Wait),
            action(
                "alice",
                ActionKind::SetVariable {
                    variable: "charisma".to_owned(),
                    value: Value::Number(1.0),
                },
            ),
            action(
                "bob",
                ActionKind::AdjustVariable {
                    variable: "gold".to_owned(),
                    delta: 100.0,
                },
            ),
        ];
        let accepted = validator.validate_actions(&batch, &state).unwrap();

        assert_eq!(accepted.len(), 2);
        let stats = validator.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.acceptance_rate, 0.5);
    }

    #[test]
    fn counters_are_per_instance() {
        let (mut validator, state) = make_fixture();
        let (untouched, _) = make_fixture();

        let batch = vec![action("alice", ActionKind::Wait)];
        validator.validate_actions(&batch, &state).unwrap();

        assert_eq!(validator.stats().accepted, 1);
        assert_eq!(untouched.stats().accepted, 0);
        assert_eq!(untouched.stats().acceptance_rate, 0.0);
    }
}
