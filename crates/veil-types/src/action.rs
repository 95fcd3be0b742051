//! Agent actions and their validation annotation.
//!
//! The action catalog is a closed set: the engine applies exactly these
//! variants and nothing else. Decision layers that want a richer vocabulary
//! translate into this catalog at the boundary. On the wire an action is a
//! flat mapping with an `action` tag, e.g.
//! `{agent: alice, action: transfer, variable: gold, to: bob, amount: 5}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AgentId;
use crate::value::Value;

/// One entry in the closed action catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    /// Replace one of the acting agent's own variables.
    SetVariable {
        /// The variable to replace.
        variable: String,
        /// The replacement value; must match the declared kind.
        value: Value,
    },
    /// Add a signed delta to one of the acting agent's numeric variables.
    AdjustVariable {
        /// The numeric variable to adjust.
        variable: String,
        /// Signed amount added to the current value.
        delta: f64,
    },
    /// Move a quantity of a numeric variable to another agent.
    Transfer {
        /// The numeric variable moved on both sides.
        variable: String,
        /// The receiving agent.
        to: AgentId,
        /// Strictly positive quantity to move.
        amount: f64,
    },
    /// Explicit no-op: the agent acts by standing still.
    Wait,
}

impl ActionKind {
    /// The stable string identifier, matching the serialized tag.
    pub const fn identifier(&self) -> &'static str {
        match self {
            Self::SetVariable { .. } => "set_variable",
            Self::AdjustVariable { .. } => "adjust_variable",
            Self::Transfer { .. } => "transfer",
            Self::Wait => "wait",
        }
    }

    /// The variable this action touches, when it touches one.
    pub fn target_variable(&self) -> Option<&str> {
        match self {
            Self::SetVariable { variable, .. }
            | Self::AdjustVariable { variable, .. }
            | Self::Transfer { variable, .. } => Some(variable.as_str()),
            Self::Wait => None,
        }
    }
}

/// A proposed agent action, possibly annotated by a validator.
///
/// Validation never mutates the proposal it inspects: acceptance produces a
/// fresh copy through [`Action::approved`], and the engine applies only
/// copies carrying `validated = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// The acting agent.
    pub agent: AgentId,
    /// What the agent wants to do.
    #[serde(flatten)]
    pub kind: ActionKind,
    /// Whether a validator accepted this copy.
    #[serde(default)]
    pub validated: bool,
    /// When validation happened; absent until then.
    #[serde(default)]
    pub validated_at: Option<DateTime<Utc>>,
}

impl Action {
    /// A fresh, unvalidated proposal.
    pub const fn new(agent: AgentId, kind: ActionKind) -> Self {
        Self {
            agent,
            kind,
            validated: false,
            validated_at: None,
        }
    }

    /// A validated copy of this proposal, stamped with the approval time.
    /// The original is left untouched.
    #[must_use]
    pub fn approved(&self, at: DateTime<Utc>) -> Self {
        Self {
            agent: self.agent.clone(),
            kind: self.kind.clone(),
            validated: true,
            validated_at: Some(at),
        }
    }
}

/// One decision crossing the boundary from a decision layer into the engine:
/// a candidate action plus the deliberation that produced it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The proposed action, not yet validated.
    #[serde(flatten)]
    pub action: Action,
    /// Free-text account of why the agent chose this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Decision {
    /// A decision with no recorded deliberation.
    pub const fn undisclosed(action: Action) -> Self {
        Self {
            action,
            rationale: None,
        }
    }

    /// A decision carrying the agent's stated reasoning.
    pub fn reasoned(action: Action, rationale: impl Into<String>) -> Self {
        Self {
            action,
            rationale: Some(rationale.into()),
        }
    }
}
