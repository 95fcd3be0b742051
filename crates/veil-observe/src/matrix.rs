//! The observability matrix: who can see whom, and how well.
//!
//! Built once from configuration and read-only afterwards. Lookups resolve
//! an (observer, target) pair to a [`Fidelity`] in O(1), falling back to
//! the configured default when no explicit entry covers the pair. All
//! validation happens at build time; a matrix that constructed successfully
//! can never fail a lookup.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use tracing::debug;
use veil_types::{
    AgentId, DefaultObservability, ObservabilityEntry, ObservabilityLevel, ObserveTarget,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building a matrix from configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatrixError {
    /// Two entries cover the same (observer, target) pair.
    #[error("duplicate observability entry for ({observer}, {target})")]
    DuplicateEntry {
        /// Observer of the duplicated pair.
        observer: AgentId,
        /// Target of the duplicated pair.
        target: ObserveTarget,
    },

    /// An entry's observer is not a configured agent.
    #[error("observability entry references unknown observer `{observer}`")]
    UnknownObserver {
        /// The unknown observer name.
        observer: AgentId,
    },

    /// An entry's target is neither a configured agent nor `global`.
    #[error("observability entry references unknown target `{target}`")]
    UnknownTarget {
        /// The unknown target name.
        target: ObserveTarget,
    },

    /// An entry declares a negative or non-finite noise factor.
    #[error("noise {noise} for ({observer}, {target}) must be finite and >= 0")]
    InvalidNoise {
        /// Observer of the offending entry.
        observer: AgentId,
        /// Target of the offending entry.
        target: ObserveTarget,
        /// The rejected noise factor.
        noise: f64,
    },

    /// The default fallback declares a negative or non-finite noise factor.
    #[error("default observability noise {noise} must be finite and >= 0")]
    InvalidDefaultNoise {
        /// The rejected noise factor.
        noise: f64,
    },
}

// ---------------------------------------------------------------------------
// Fidelity
// ---------------------------------------------------------------------------

/// The resolved answer for one (observer, target) lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fidelity {
    /// Visibility depth for the pair.
    pub level: ObservabilityLevel,
    /// Multiplicative noise factor; 0 means the pair observes exactly.
    pub noise: f64,
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Static lookup from (observer, target) to [`Fidelity`], with a default.
///
/// Rows are keyed by observer, then by target, so lookups borrow both keys
/// and allocate nothing. Iteration order of the backing maps is never
/// observable through the API.
#[derive(Debug, Clone)]
pub struct ObservabilityMatrix {
    rows: HashMap<AgentId, HashMap<ObserveTarget, Fidelity>>,
    default: Fidelity,
}

impl ObservabilityMatrix {
    /// Build a matrix from explicit entries plus the default fallback.
    ///
    /// `known_agents` is the full set of configured agent names; entries
    /// referencing anything outside it are rejected, as are duplicated
    /// pairs and negative noise. Fails fast on the first problem found.
    pub fn build(
        entries: &[ObservabilityEntry],
        default: DefaultObservability,
        known_agents: &BTreeSet<AgentId>,
    ) -> Result<Self, MatrixError> {
        let default_noise = default.noise.unwrap_or(0.0);
        if !default_noise.is_finite() || default_noise < 0.0 {
            return Err(MatrixError::InvalidDefaultNoise {
                noise: default_noise,
            });
        }

        let mut rows: HashMap<AgentId, HashMap<ObserveTarget, Fidelity>> =
            HashMap::with_capacity(known_agents.len());

        for entry in entries {
            if !known_agents.contains(&entry.observer) {
                return Err(MatrixError::UnknownObserver {
                    observer: entry.observer.clone(),
                });
            }
            if let ObserveTarget::Agent(target) = &entry.target
                && !known_agents.contains(target)
            {
                return Err(MatrixError::UnknownTarget {
                    target: entry.target.clone(),
                });
            }

            let noise = entry.noise.unwrap_or(0.0);
            if !noise.is_finite() || noise < 0.0 {
                return Err(MatrixError::InvalidNoise {
                    observer: entry.observer.clone(),
                    target: entry.target.clone(),
                    noise,
                });
            }

            let fidelity = Fidelity {
                level: entry.level,
                noise,
            };
            let row = rows.entry(entry.observer.clone()).or_default();
            if row.insert(entry.target.clone(), fidelity).is_some() {
                return Err(MatrixError::DuplicateEntry {
                    observer: entry.observer.clone(),
                    target: entry.target.clone(),
                });
            }
        }

        debug!(
            entries = entries.len(),
            default_level = %default.level,
            "Observability matrix built"
        );

        Ok(Self {
            rows,
            default: Fidelity {
                level: default.level,
                noise: default_noise,
            },
        })
    }

    /// Resolve one (observer, target) pair.
    ///
    /// Returns the explicit entry if present, otherwise the default.
    pub fn fidelity(&self, observer: &AgentId, target: &ObserveTarget) -> Fidelity {
        self.rows
            .get(observer)
            .and_then(|row| row.get(target))
            .copied()
            .unwrap_or(self.default)
    }

    /// The fallback applied to pairs without an explicit entry.
    pub const fn default_fidelity(&self) -> Fidelity {
        self.default
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn known(names: &[&str]) -> BTreeSet<AgentId> {
        names.iter().map(|name| AgentId::from(*name)).collect()
    }

    fn entry(
        observer: &str,
        target: ObserveTarget,
        level: ObservabilityLevel,
        noise: Option<f64>,
    ) -> ObservabilityEntry {
        ObservabilityEntry {
            observer: AgentId::from(observer),
            target,
            level,
            noise,
        }
    }

    #[test]
    fn explicit_pairs_return_their_entry() {
        let agents = known(&["alice", "bob"]);
        let matrix = ObservabilityMatrix::build(
            &[entry(
                "alice",
                ObserveTarget::Agent(AgentId::from("bob")),
                ObservabilityLevel::Insider,
                Some(0.25),
            )],
            DefaultObservability::default(),
            &agents,
        )
        .unwrap();

        let fidelity = matrix.fidelity(
            &AgentId::from("alice"),
            &ObserveTarget::Agent(AgentId::from("bob")),
        );
        assert_eq!(fidelity.level, ObservabilityLevel::Insider);
        assert_eq!(fidelity.noise, 0.25);
    }

    #[test]
    fn uncovered_pairs_fall_back_to_the_default() {
        let agents = known(&["alice", "bob"]);
        let matrix = ObservabilityMatrix::build(
            &[],
            DefaultObservability {
                level: ObservabilityLevel::External,
                noise: Some(0.1),
            },
            &agents,
        )
        .unwrap();

        let fidelity = matrix.fidelity(
            &AgentId::from("bob"),
            &ObserveTarget::Agent(AgentId::from("alice")),
        );
        assert_eq!(fidelity.level, ObservabilityLevel::External);
        assert_eq!(fidelity.noise, 0.1);
        assert_eq!(matrix.default_fidelity().noise, 0.1);
    }

    #[test]
    fn entry_with_absent_noise_resolves_to_zero_not_the_default() {
        let agents = known(&["alice", "bob"]);
        let matrix = ObservabilityMatrix::build(
            &[entry(
                "alice",
                ObserveTarget::Agent(AgentId::from("bob")),
                ObservabilityLevel::External,
                None,
            )],
            DefaultObservability {
                level: ObservabilityLevel::External,
                noise: Some(0.5),
            },
            &agents,
        )
        .unwrap();

        let fidelity = matrix.fidelity(
            &AgentId::from("alice"),
            &ObserveTarget::Agent(AgentId::from("bob")),
        );
        assert_eq!(fidelity.noise, 0.0);
    }

    #[test]
    fn global_targets_are_always_known() {
        let agents = known(&["alice"]);
        let matrix = ObservabilityMatrix::build(
            &[entry(
                "alice",
                ObserveTarget::Global,
                ObservabilityLevel::Unaware,
                None,
            )],
            DefaultObservability::default(),
            &agents,
        )
        .unwrap();

        let fidelity = matrix.fidelity(&AgentId::from("alice"), &ObserveTarget::Global);
        assert_eq!(fidelity.level, ObservabilityLevel::Unaware);
    }

    #[test]
    fn duplicate_pairs_are_rejected() {
        let agents = known(&["alice", "bob"]);
        let bob = ObserveTarget::Agent(AgentId::from("bob"));
        let result = ObservabilityMatrix::build(
            &[
                entry("alice", bob.clone(), ObservabilityLevel::External, None),
                entry("alice", bob.clone(), ObservabilityLevel::Insider, None),
            ],
            DefaultObservability::default(),
            &agents,
        );
        assert_eq!(
            result.unwrap_err(),
            MatrixError::DuplicateEntry {
                observer: AgentId::from("alice"),
                target: bob,
            }
        );
    }

    #[test]
    fn unknown_observer_is_rejected() {
        let agents = known(&["alice"]);
        let result = ObservabilityMatrix::build(
            &[entry(
                "ghost",
                ObserveTarget::Global,
                ObservabilityLevel::External,
                None,
            )],
            DefaultObservability::default(),
            &agents,
        );
        assert!(matches!(
            result,
            Err(MatrixError::UnknownObserver { .. })
        ));
    }

    #[test]
    fn unknown_target_is_rejected() {
        let agents = known(&["alice"]);
        let result = ObservabilityMatrix::build(
            &[entry(
                "alice",
                ObserveTarget::Agent(AgentId::from("ghost")),
                ObservabilityLevel::External,
                None,
            )],
            DefaultObservability::default(),
            &agents,
        );
        assert!(matches!(result, Err(MatrixError::UnknownTarget { .. })));
    }

    #[test]
    fn negative_noise_is_rejected() {
        let agents = known(&["alice", "bob"]);
        let result = ObservabilityMatrix::build(
            &[entry(
                "alice",
                ObserveTarget::Agent(AgentId::from("bob")),
                ObservabilityLevel::External,
                Some(-0.1),
            )],
            DefaultObservability::default(),
            &agents,
        );
        assert!(matches!(result, Err(MatrixError::InvalidNoise { .. })));
    }

    #[test]
    fn negative_default_noise_is_rejected() {
        let agents = known(&["alice"]);
        let result = ObservabilityMatrix::build(
            &[],
            DefaultObservability {
                level: ObservabilityLevel::External,
                noise: Some(-1.0),
            },
            &agents,
        );
        assert_eq!(
            result.unwrap_err(),
            MatrixError::InvalidDefaultNoise { noise: -1.0 }
        );
    }
}
