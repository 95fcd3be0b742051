//! Variable schema declarations and the visibility classification.
//!
//! A scope (one agent, or the simulation-wide global scope) declares its
//! variables once at simulation start: a kind, an optional initial value,
//! and optional inclusive bounds. Separately, a [`VisibilityPolicy`]
//! partitions variable names into externally visible and internal-only
//! sets. Both are validated fail-fast before any state exists.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Value, VariableKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while validating variable declarations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// A variable name appears in both visibility sets.
    #[error("variable `{variable}` is classified as both external and internal")]
    ConflictingVisibility {
        /// The doubly classified variable name.
        variable: String,
    },

    /// A visibility classification names a variable no scope declares.
    #[error("visibility classification references undeclared variable `{variable}`")]
    UndeclaredVariable {
        /// The unknown variable name.
        variable: String,
    },

    /// Bounds were declared on a variable whose kind is not numeric.
    #[error("variable `{variable}` declares bounds but its kind is `{kind}`")]
    BoundsOnNonNumeric {
        /// The offending variable name.
        variable: String,
        /// The declared non-numeric kind.
        kind: VariableKind,
    },

    /// A declared bound is NaN or infinite.
    #[error("variable `{variable}` declares a non-finite bound")]
    NonFiniteBound {
        /// The offending variable name.
        variable: String,
    },

    /// The lower bound exceeds the upper bound.
    #[error("variable `{variable}` has inverted bounds: min {min} > max {max}")]
    InvertedBounds {
        /// The offending variable name.
        variable: String,
        /// Declared lower bound.
        min: f64,
        /// Declared upper bound.
        max: f64,
    },

    /// The initial value does not match the declared kind.
    #[error(
        "variable `{variable}` declares kind `{declared}` but its initial value is `{found}`"
    )]
    InitialKindMismatch {
        /// The offending variable name.
        variable: String,
        /// The kind the schema declares.
        declared: VariableKind,
        /// The kind of the supplied initial value.
        found: &'static str,
    },

    /// A numeric initial value sits outside the declared bounds.
    #[error("variable `{variable}` initial value {value} is outside bounds {bounds}")]
    InitialOutOfBounds {
        /// The offending variable name.
        variable: String,
        /// The out-of-range initial value.
        value: f64,
        /// The declared bounds.
        bounds: Bounds,
    },
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Inclusive numeric bounds on a variable.
///
/// Either side may be absent, meaning unbounded in that direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Inclusive lower bound.
    #[serde(default)]
    pub min: Option<f64>,
    /// Inclusive upper bound.
    #[serde(default)]
    pub max: Option<f64>,
}

impl Bounds {
    /// Whether `value` lies inside the bounds (inclusive on both sides).
    ///
    /// NaN never satisfies a bound comparison, so a NaN value is reported
    /// as out of bounds whenever any side is declared.
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }

    /// Snap `value` back inside the bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        let floored = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(floored, |max| floored.min(max))
    }
}

impl core::fmt::Display for Bounds {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let min = self.min.unwrap_or(f64::NEG_INFINITY);
        let max = self.max.unwrap_or(f64::INFINITY);
        write!(f, "[{min}, {max}]")
    }
}

// ---------------------------------------------------------------------------
// Variable specs
// ---------------------------------------------------------------------------

/// Declaration of one variable in a scope's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// The declared kind.
    pub kind: VariableKind,
    /// Starting value; the kind's zero value when omitted.
    #[serde(default)]
    pub initial: Option<Value>,
    /// Optional inclusive bounds. Only numeric variables may declare them.
    #[serde(default)]
    pub bounds: Option<Bounds>,
}

impl VariableSpec {
    /// A spec with no explicit initial value and no bounds.
    pub const fn of_kind(kind: VariableKind) -> Self {
        Self {
            kind,
            initial: None,
            bounds: None,
        }
    }

    /// The value this variable starts the simulation with.
    pub fn initial_value(&self) -> Value {
        self.initial
            .clone()
            .unwrap_or_else(|| self.kind.default_value())
    }

    /// Fail-fast validation of one declaration.
    ///
    /// `name` is only used in error messages; the caller owns the mapping
    /// from names to specs.
    pub fn validate(&self, name: &str) -> Result<(), SchemaError> {
        if let Some(bounds) = self.bounds {
            if self.kind != VariableKind::Number {
                return Err(SchemaError::BoundsOnNonNumeric {
                    variable: name.to_owned(),
                    kind: self.kind,
                });
            }
            for side in [bounds.min, bounds.max].into_iter().flatten() {
                if !side.is_finite() {
                    return Err(SchemaError::NonFiniteBound {
                        variable: name.to_owned(),
                    });
                }
            }
            if let (Some(min), Some(max)) = (bounds.min, bounds.max)
                && min > max
            {
                return Err(SchemaError::InvertedBounds {
                    variable: name.to_owned(),
                    min,
                    max,
                });
            }
        }

        if let Some(initial) = &self.initial {
            if !self.kind.admits(initial) {
                return Err(SchemaError::InitialKindMismatch {
                    variable: name.to_owned(),
                    declared: self.kind,
                    found: initial.kind_name(),
                });
            }
            if let (Some(bounds), Some(value)) = (self.bounds, initial.as_number())
                && !bounds.contains(value)
            {
                return Err(SchemaError::InitialOutOfBounds {
                    variable: name.to_owned(),
                    value,
                    bounds,
                });
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Visibility classification
// ---------------------------------------------------------------------------

/// Which observers may see a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityClass {
    /// Visible at `external` observability and above.
    External,
    /// Visible only at `insider` observability.
    Internal,
}

/// The static partition of variable names into externally visible and
/// internal-only sets.
///
/// A name absent from both sets classifies as external. That default keeps
/// configurations written before visibility classification existed behaving
/// exactly as they always did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityPolicy {
    /// Names visible to external observers.
    #[serde(default)]
    pub external: BTreeSet<String>,
    /// Names visible only at insider level.
    #[serde(default)]
    pub internal: BTreeSet<String>,
}

impl VisibilityPolicy {
    /// Build a policy from the two classification sets, rejecting overlap.
    pub fn new(
        external: BTreeSet<String>,
        internal: BTreeSet<String>,
    ) -> Result<Self, SchemaError> {
        let policy = Self { external, internal };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject any name classified into both sets.
    pub fn validate(&self) -> Result<(), SchemaError> {
        self.external.intersection(&self.internal).next().map_or(
            Ok(()),
            |variable| {
                Err(SchemaError::ConflictingVisibility {
                    variable: variable.clone(),
                })
            },
        )
    }

    /// Classify one variable name, defaulting to external.
    pub fn classify(&self, name: &str) -> VisibilityClass {
        if self.internal.contains(name) {
            VisibilityClass::Internal
        } else {
            VisibilityClass::External
        }
    }

    /// Every name either set mentions, for declared-variable checks.
    pub fn classified_names(&self) -> impl Iterator<Item = &String> {
        self.external.union(&self.internal)
    }
}
