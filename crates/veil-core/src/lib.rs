//! Turn engine, validation, and run orchestration for the Veil simulation.
//!
//! This crate owns the turn cycle that drives a run: observe, decide,
//! validate, execute, check termination. Construction is fail-fast -- a
//! configuration either produces a fully resolved engine or an error
//! naming what is wrong -- and execution is deterministic apart from the
//! decision source a caller plugs in.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration loading, validation, and the schema
//!   index derived from it.
//! - [`decision`] -- [`DecisionSource`] trait, the built-in `idle` and
//!   `scripted` sources, and their registry.
//! - [`engine`] -- The [`TurnEngine`]: lifecycle phases, atomic turn
//!   execution, termination checks.
//! - [`rules`] -- Named deterministic state transformations folded after
//!   actions each turn.
//! - [`runner`] -- The run loop wiring observations, decisions,
//!   validation, and turns together.
//! - [`validator`] -- Schema- and state-aware action validation.
//!
//! [`DecisionSource`]: decision::DecisionSource
//! [`TurnEngine`]: engine::TurnEngine

pub mod config;
pub mod decision;
pub mod engine;
pub mod rules;
pub mod runner;
pub mod validator;
