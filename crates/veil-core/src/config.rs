//! Typed simulation configuration: loading, validation, and indexing.
//!
//! A simulation is declared as one YAML document. Every section except the
//! agent roster is optional and falls back to teachable defaults, so the
//! smallest useful config is a list of agents and their variables. Loading
//! validates fail-fast: a config that parses but cannot produce a coherent
//! simulation is rejected before any state exists.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use veil_observe::{MatrixError, ObservabilityMatrix, ObservationBuilder};
use veil_types::{
    AgentId, AgentState, DefaultObservability, Decision, GlobalState, ObservabilityEntry,
    ObserveTarget, SchemaError, SimulationState, VariableKind, VariableSpec, VisibilityPolicy,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a simulation config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the config file from disk failed.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: std::io::Error,
    },

    /// The file content is not valid YAML for the config schema.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A variable declaration or visibility classification is invalid.
    #[error("invalid variable declaration: {source}")]
    Schema {
        /// The underlying schema error.
        #[from]
        source: SchemaError,
    },

    /// The observability matrix could not be assembled.
    #[error("invalid observability matrix: {source}")]
    Matrix {
        /// The underlying matrix error.
        #[from]
        source: MatrixError,
    },

    /// The config declares no agents at all.
    #[error("config declares no agents; a simulation needs at least one")]
    EmptyRoster,

    /// Two agents share a name.
    #[error("agent `{agent}` is declared more than once")]
    DuplicateAgent {
        /// The repeated agent name.
        agent: AgentId,
    },

    /// An agent claims the name reserved for the global scope.
    #[error("agent name `{agent}` is reserved for the global scope")]
    ReservedAgentName {
        /// The offending agent name.
        agent: AgentId,
    },

    /// A rule entry names an identifier the registry does not know.
    #[error("unknown engine rule `{kind}`; known rules: {known}")]
    UnknownRule {
        /// The unrecognized rule identifier.
        kind: String,
        /// Comma-separated list of valid identifiers.
        known: String,
    },

    /// A rule entry is recognized but its parameters are unusable.
    #[error("invalid `{rule}` rule: {reason}")]
    InvalidRule {
        /// The rule identifier.
        rule: String,
        /// What is wrong with the parameters.
        reason: String,
    },

    /// The decisions section names a source the registry does not know.
    #[error("unknown decision source `{kind}`; known sources: {known}")]
    UnknownDecisionSource {
        /// The unrecognized source identifier.
        kind: String,
        /// Comma-separated list of valid identifiers.
        known: String,
    },

    /// A termination bound is malformed or references nothing trackable.
    #[error("invalid termination bound on `{variable}`: {reason}")]
    InvalidBound {
        /// The tracked variable name.
        variable: String,
        /// What is wrong with the bound.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// The complete declaration of one simulation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Run-wide settings.
    #[serde(default)]
    pub simulation: SimulationSettings,

    /// The agent roster. Required; everything else has defaults.
    pub agents: Vec<AgentConfig>,

    /// Simulation-wide variables, keyed by name.
    #[serde(default)]
    pub global: BTreeMap<String, VariableSpec>,

    /// Variable visibility classification shared by all scopes.
    #[serde(default)]
    pub visibility: VisibilityPolicy,

    /// Partial-observability matrix declaration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Engine rules applied every turn, in declaration order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// When the simulation ends.
    #[serde(default)]
    pub termination: TerminationConfig,

    /// Where decisions come from.
    #[serde(default)]
    pub decisions: DecisionConfig,
}

impl SimulationConfig {
    /// Load and validate a config from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or any
    /// validation error the parsed config trips.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate a config from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// any validation error the parsed config trips.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Fail-fast validation of everything the config declares.
    ///
    /// Rule and decision-source identifiers are resolved separately when
    /// their registries construct the concrete instances; both still
    /// happen before any state exists.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found: an empty roster, a
    /// duplicate or reserved agent name, an invalid variable declaration,
    /// a visibility entry for an undeclared variable, a malformed
    /// observability matrix, or an unusable termination bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }

        let mut seen: BTreeSet<&AgentId> = BTreeSet::new();
        for agent in &self.agents {
            if agent.name.as_str() == ObserveTarget::GLOBAL_NAME {
                return Err(ConfigError::ReservedAgentName {
                    agent: agent.name.clone(),
                });
            }
            if !seen.insert(&agent.name) {
                return Err(ConfigError::DuplicateAgent {
                    agent: agent.name.clone(),
                });
            }
            for (name, spec) in &agent.variables {
                spec.validate(name)?;
            }
        }
        for (name, spec) in &self.global {
            spec.validate(name)?;
        }

        self.validate_visibility()?;
        self.validate_bounds()?;

        // Matrix assembly is itself the validation of the entries.
        self.observation_builder()?;
        Ok(())
    }

    /// The observation pipeline this config describes.
    ///
    /// A missing or disabled observability section yields the disabled
    /// builder, which hands every observer a full copy of ground truth.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Matrix`] if an entry references an unknown
    /// agent, repeats an (observer, target) pair, or declares an invalid
    /// noise factor.
    pub fn observation_builder(&self) -> Result<ObservationBuilder, ConfigError> {
        if !self.observability.enabled {
            return Ok(ObservationBuilder::disabled());
        }
        let matrix = ObservabilityMatrix::build(
            &self.observability.entries,
            self.observability.default,
            &self.agent_names(),
        )?;
        Ok(ObservationBuilder::new(matrix, self.visibility.clone()))
    }

    /// The declared agent names, in sorted order.
    pub fn agent_names(&self) -> BTreeSet<AgentId> {
        self.agents.iter().map(|agent| agent.name.clone()).collect()
    }

    /// The variable declarations, indexed for lookup.
    pub fn schema_index(&self) -> SchemaIndex {
        SchemaIndex::from_config(self)
    }

    fn validate_visibility(&self) -> Result<(), ConfigError> {
        self.visibility.validate()?;

        let mut declared: BTreeSet<&str> = BTreeSet::new();
        for agent in &self.agents {
            declared.extend(agent.variables.keys().map(String::as_str));
        }
        declared.extend(self.global.keys().map(String::as_str));

        for name in self.visibility.classified_names() {
            if !declared.contains(name.as_str()) {
                return Err(SchemaError::UndeclaredVariable {
                    variable: name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn validate_bounds(&self) -> Result<(), ConfigError> {
        for bound in &self.termination.bounds {
            if bound.min.is_none() && bound.max.is_none() {
                return Err(ConfigError::InvalidBound {
                    variable: bound.variable.clone(),
                    reason: "declares neither min nor max".to_owned(),
                });
            }
            for side in [bound.min, bound.max].into_iter().flatten() {
                if !side.is_finite() {
                    return Err(ConfigError::InvalidBound {
                        variable: bound.variable.clone(),
                        reason: "bound is not finite".to_owned(),
                    });
                }
            }
            if let (Some(min), Some(max)) = (bound.min, bound.max)
                && min > max
            {
                return Err(ConfigError::InvalidBound {
                    variable: bound.variable.clone(),
                    reason: format!("min {min} exceeds max {max}"),
                });
            }
            if !self.declares_tracked_variable(bound) {
                return Err(ConfigError::InvalidBound {
                    variable: bound.variable.clone(),
                    reason: format!(
                        "no numeric variable `{}` is declared in scope `{}`",
                        bound.variable,
                        bound.scope.as_str()
                    ),
                });
            }
        }
        Ok(())
    }

    fn declares_tracked_variable(&self, bound: &TrackedBound) -> bool {
        let is_number = |spec: &VariableSpec| spec.kind == VariableKind::Number;
        match bound.scope {
            BoundScope::Agents => self
                .agents
                .iter()
                .any(|agent| agent.variables.get(&bound.variable).is_some_and(is_number)),
            BoundScope::Global => self.global.get(&bound.variable).is_some_and(is_number),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Run-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulationSettings {
    /// Human-readable simulation name, for logs and reports.
    #[serde(default = "default_simulation_name")]
    pub name: String,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            name: default_simulation_name(),
        }
    }
}

/// One agent's declaration: a name and its variable schema.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    /// The agent's unique name.
    pub name: AgentId,

    /// The agent's variables, keyed by name.
    #[serde(default)]
    pub variables: BTreeMap<String, VariableSpec>,
}

/// The partial-observability section.
///
/// When the section is absent the matrix is disabled and every observer
/// receives a full copy of ground truth, matching configs written before
/// partial observability existed. When the section is present it is
/// enabled unless `enabled: false` says otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObservabilityConfig {
    /// Whether the matrix applies at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fallback fidelity for pairs without an explicit entry.
    #[serde(default)]
    pub default: DefaultObservability,

    /// Explicit per-pair fidelity entries.
    #[serde(default)]
    pub entries: Vec<ObservabilityEntry>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default: DefaultObservability::default(),
            entries: Vec::new(),
        }
    }
}

/// One engine rule entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleConfig {
    /// Registry identifier of the rule to apply.
    pub rule: String,

    /// Restrict the rule to one variable name; all numeric variables in
    /// scope when absent.
    #[serde(default)]
    pub variable: Option<String>,

    /// Which scopes the rule touches.
    #[serde(default)]
    pub scope: RuleScope,

    /// Per-turn rate for rules that take one; ignored by the others.
    #[serde(default)]
    pub rate: f64,
}

/// Which scopes an engine rule applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Agent variables and global variables alike.
    #[default]
    All,
    /// Agent variables only.
    Agents,
    /// Global variables only.
    Global,
}

impl RuleScope {
    /// Whether agent scopes are covered.
    pub const fn covers_agents(self) -> bool {
        matches!(self, Self::All | Self::Agents)
    }

    /// Whether the global scope is covered.
    pub const fn covers_global(self) -> bool {
        matches!(self, Self::All | Self::Global)
    }
}

/// The termination section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TerminationConfig {
    /// End the run once this many turns have completed. Absent means the
    /// run is bounded only by tracked bounds and the caller's safety cap.
    #[serde(default)]
    pub max_turns: Option<u64>,

    /// Numeric windows whose breach ends the run.
    #[serde(default)]
    pub bounds: Vec<TrackedBound>,
}

/// One tracked numeric window.
///
/// The run ends as soon as any value the bound covers leaves the window.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackedBound {
    /// Which scope's copies of the variable are watched.
    #[serde(default)]
    pub scope: BoundScope,

    /// The watched variable name.
    pub variable: String,

    /// Inclusive lower edge of the window.
    #[serde(default)]
    pub min: Option<f64>,

    /// Inclusive upper edge of the window.
    #[serde(default)]
    pub max: Option<f64>,
}

impl TrackedBound {
    /// Whether `value` is still inside the window. NaN never is.
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// Which scope a tracked bound watches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundScope {
    /// Every agent's copy of the variable.
    #[default]
    Agents,
    /// The global scope's copy.
    Global,
}

impl BoundScope {
    /// The stable identifier, matching the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agents => "agents",
            Self::Global => "global",
        }
    }
}

/// The decisions section: which source proposes actions each turn.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecisionConfig {
    /// Registry identifier of the decision source.
    #[serde(default = "default_decision_source")]
    pub source: String,

    /// Pre-written decisions for the `scripted` source, keyed by turn.
    #[serde(default)]
    pub script: Vec<ScriptedTurn>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            source: default_decision_source(),
            script: Vec::new(),
        }
    }
}

/// One turn's worth of scripted decisions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptedTurn {
    /// The turn (the current turn number when decisions are collected)
    /// these decisions are submitted on.
    pub turn: u64,

    /// The decisions, in submission order.
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

// ---------------------------------------------------------------------------
// Schema index
// ---------------------------------------------------------------------------

/// Variable declarations indexed for lookup.
///
/// Built once from a validated config and consulted by the action
/// validator, the engine rules, and initial state assembly. The index is
/// a value type: holders own their copy and the config can be dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaIndex {
    agents: BTreeMap<AgentId, BTreeMap<String, VariableSpec>>,
    global: BTreeMap<String, VariableSpec>,
}

impl SchemaIndex {
    /// Index a config's declarations.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let agents = config
            .agents
            .iter()
            .map(|agent| (agent.name.clone(), agent.variables.clone()))
            .collect();
        Self {
            agents,
            global: config.global.clone(),
        }
    }

    /// Whether the roster declares this agent.
    pub fn has_agent(&self, agent: &AgentId) -> bool {
        self.agents.contains_key(agent)
    }

    /// One agent variable's declaration, if present.
    pub fn agent_spec(&self, agent: &AgentId, variable: &str) -> Option<&VariableSpec> {
        self.agents.get(agent).and_then(|vars| vars.get(variable))
    }

    /// One global variable's declaration, if present.
    pub fn global_spec(&self, variable: &str) -> Option<&VariableSpec> {
        self.global.get(variable)
    }

    /// Every agent's declarations, keyed by name.
    pub const fn agents(&self) -> &BTreeMap<AgentId, BTreeMap<String, VariableSpec>> {
        &self.agents
    }

    /// The global declarations.
    pub const fn global(&self) -> &BTreeMap<String, VariableSpec> {
        &self.global
    }

    /// Assemble the turn-0 ground truth the declarations describe.
    ///
    /// Every declared variable is present from the start, holding its
    /// configured initial value or the kind's zero value.
    pub fn initial_state(&self) -> SimulationState {
        let agents = self
            .agents
            .iter()
            .map(|(name, vars)| {
                let variables = vars
                    .iter()
                    .map(|(var, spec)| (var.clone(), spec.initial_value()))
                    .collect();
                (name.clone(), AgentState::new(name.clone(), variables))
            })
            .collect();
        let globals = self
            .global
            .iter()
            .map(|(var, spec)| (var.clone(), spec.initial_value()))
            .collect();
        SimulationState::new(agents, GlobalState::new(globals))
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_simulation_name() -> String {
    "veil".to_owned()
}

fn default_decision_source() -> String {
    "idle".to_owned()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r"
agents:
  - name: alice
    variables:
      energy:
        kind: number
        initial: 10
"
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = SimulationConfig::parse(minimal_yaml()).unwrap();
        assert_eq!(config.simulation.name, "veil");
        assert_eq!(config.agents.len(), 1);
        assert!(!config.observability.enabled);
        assert!(config.rules.is_empty());
        assert_eq!(config.termination.max_turns, None);
        assert_eq!(config.decisions.source, "idle");
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
simulation:
  name: "border dispute"

agents:
  - name: alice
    variables:
      strength:
        kind: number
        initial: 100
        bounds: {min: 0}
      doubt:
        kind: number
  - name: bob
    variables:
      strength:
        kind: number
        initial: 80

global:
  temperature:
    kind: number
    initial: 20

visibility:
  external: [strength]
  internal: [doubt]

observability:
  default:
    level: external
    noise: 0.1
  entries:
    - observer: alice
      target: bob
      level: external
      noise: 0.2
    - observer: bob
      target: global
      level: insider

rules:
  - rule: decay
    variable: strength
    scope: agents
    rate: 0.01

termination:
  max_turns: 50
  bounds:
    - scope: agents
      variable: strength
      min: 1

decisions:
  source: scripted
  script:
    - turn: 0
      decisions:
        - agent: alice
          action: transfer
          variable: strength
          to: bob
          amount: 5
          rationale: "shoring up an ally"
"#;
        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.simulation.name, "border dispute");
        assert!(config.observability.enabled);
        assert_eq!(config.observability.entries.len(), 2);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.termination.max_turns, Some(50));
        assert_eq!(config.decisions.script.len(), 1);
        let turn = config.decisions.script.first().unwrap();
        let scripted = turn.decisions.first().unwrap();
        assert_eq!(scripted.action.agent, AgentId::from("alice"));
        assert_eq!(scripted.rationale.as_deref(), Some("shoring up an ally"));
    }

    #[test]
    fn empty_roster_is_rejected() {
        let err = SimulationConfig::parse("agents: []").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyRoster));
    }

    #[test]
    fn duplicate_agent_names_are_rejected() {
        let yaml = "
agents:
  - name: alice
  - name: alice
";
        let err = SimulationConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateAgent { .. }));
    }

    #[test]
    fn the_global_name_is_reserved() {
        let yaml = "
agents:
  - name: global
";
        let err = SimulationConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedAgentName { .. }));
    }

    #[test]
    fn visibility_of_undeclared_variables_is_rejected() {
        let yaml = "
agents:
  - name: alice
    variables:
      energy: {kind: number}
visibility:
  internal: [charisma]
";
        let err = SimulationConfig::parse(yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Schema {
                source: SchemaError::UndeclaredVariable { .. }
            }
        ));
    }

    #[test]
    fn invalid_variable_declarations_are_rejected() {
        let yaml = "
agents:
  - name: alice
    variables:
      motto:
        kind: text
        bounds: {min: 0}
";
        let err = SimulationConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn matrix_entries_for_unknown_agents_are_rejected() {
        let yaml = "
agents:
  - name: alice
observability:
  entries:
    - observer: ghost
      target: alice
      level: external
";
        let err = SimulationConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Matrix { .. }));
    }

    #[test]
    fn termination_bounds_must_watch_declared_numbers() {
        let yaml = "
agents:
  - name: alice
    variables:
      motto: {kind: text}
termination:
  bounds:
    - variable: motto
      min: 0
";
        let err = SimulationConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBound { .. }));
    }

    #[test]
    fn termination_bounds_need_at_least_one_edge() {
        let yaml = "
agents:
  - name: alice
    variables:
      energy: {kind: number}
termination:
  bounds:
    - variable: energy
";
        let err = SimulationConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBound { .. }));
    }

    #[test]
    fn initial_state_holds_every_declared_variable() {
        let config = SimulationConfig::parse(minimal_yaml()).unwrap();
        let state = config.schema_index().initial_state();
        assert_eq!(state.turn, 0);
        assert_eq!(
            state.agent_number(&AgentId::from("alice"), "energy").unwrap(),
            10.0
        );
    }

    #[test]
    fn tracked_bound_windows_are_inclusive() {
        let bound = TrackedBound {
            scope: BoundScope::Agents,
            variable: "energy".to_owned(),
            min: Some(0.0),
            max: Some(10.0),
        };
        assert!(bound.contains(0.0));
        assert!(bound.contains(10.0));
        assert!(!bound.contains(10.1));
        assert!(!bound.contains(f64::NAN));
    }
}
