//! Partial observability for the Veil simulation engine.
//!
//! This crate turns ground truth into per-agent views. The observability
//! matrix answers who can see whom and how well; the variable filter
//! projects a scope down to what a visibility level permits; the noise
//! generator degrades numeric readings deterministically; and the
//! observation builder composes the three into one agent's [`Observation`].
//!
//! # Modules
//!
//! - [`matrix`] -- (observer, target) fidelity lookup with a default fallback
//! - [`noise`] -- Deterministic multiplicative noise keyed per perturbation site
//! - [`filter`] -- Visibility-level projection of variable sets
//! - [`builder`] -- Per-agent observation assembly
//!
//! [`Observation`]: builder::Observation

pub mod builder;
pub mod filter;
pub mod matrix;
pub mod noise;

// Re-export all public types at crate root for convenience.
pub use builder::{BuildError, Observation, ObservationBuilder};
pub use filter::filter_variables;
pub use matrix::{Fidelity, MatrixError, ObservabilityMatrix};
pub use noise::{NoiseKey, perturb};
