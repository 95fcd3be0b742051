//! Shared type definitions for the Veil simulation engine.
//!
//! This crate is the single source of truth for the data model: variable
//! values and schemas, canonical ground-truth state, the action catalog,
//! and the observability vocabulary. It carries invariants and immutable
//! update builders, but no engine behavior.
//!
//! # Modules
//!
//! - [`ids`] -- Run and agent identifier newtypes
//! - [`value`] -- Typed variable values and kind classification
//! - [`schema`] -- Variable declarations, bounds, visibility classification
//! - [`state`] -- Ground-truth state with immutable-update builders
//! - [`action`] -- The closed action catalog and validation annotation
//! - [`observability`] -- Levels, targets, entries, and the default fallback

pub mod action;
pub mod ids;
pub mod observability;
pub mod schema;
pub mod state;
pub mod value;

// Re-export all public types at crate root for convenience.
pub use action::{Action, ActionKind, Decision};
pub use ids::{AgentId, RunId};
pub use observability::{
    DefaultObservability, ObservabilityEntry, ObservabilityLevel, ObserveTarget,
};
pub use schema::{Bounds, SchemaError, VariableSpec, VisibilityClass, VisibilityPolicy};
pub use state::{AgentState, GlobalState, ReasoningRecord, SimulationState, StateError};
pub use value::{Value, VariableKind};
