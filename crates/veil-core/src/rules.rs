//! Engine rules: named, deterministic state transformations.
//!
//! After the accepted actions of a turn are applied, the engine folds the
//! state through its configured rules in declaration order. Rules come
//! from a closed registry: a config names a rule by identifier and the
//! registry hands back the concrete implementation, or fails fast naming
//! every identifier it does know.

use std::collections::BTreeMap;

use veil_types::{
    AgentId, Bounds, SimulationState, StateError, Value, VariableKind, VariableSpec,
};

use crate::config::{ConfigError, RuleConfig, RuleScope, SchemaIndex};

// ---------------------------------------------------------------------------
// The rule trait
// ---------------------------------------------------------------------------

/// One deterministic transformation applied every turn.
///
/// Rules run after actions, each folding the state the previous one
/// produced. An implementation must be a pure function of the state it
/// is given: no clocks, no randomness, no hidden inputs, so replaying a
/// run folds to identical states.
pub trait EngineRule: core::fmt::Debug {
    /// The registry identifier this rule was built from.
    fn name(&self) -> &'static str;

    /// Fold the state through the rule.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the rule touches a variable the state
    /// does not hold. Constructors are checked against the same schema
    /// the state is built from, so an error here means the state did not
    /// come from that schema.
    fn apply(&self, state: SimulationState) -> Result<SimulationState, StateError>;
}

// ---------------------------------------------------------------------------
// Concrete rules
// ---------------------------------------------------------------------------

/// Multiplies numeric variables by a fixed per-turn factor.
///
/// Backs both the `growth` and `decay` registry entries; the two differ
/// only in how the configured rate maps to a factor.
#[derive(Debug, Clone)]
struct ScaleRule {
    name: &'static str,
    factor: f64,
    scope: RuleScope,
    variable: Option<String>,
}

impl ScaleRule {
    fn touches(&self, variable: &str) -> bool {
        self.variable.as_deref().is_none_or(|only| only == variable)
    }
}

impl EngineRule for ScaleRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, state: SimulationState) -> Result<SimulationState, StateError> {
        let mut next = state;
        if self.scope.covers_agents() {
            let targets: Vec<(AgentId, String, f64)> = next
                .agents
                .iter()
                .flat_map(|(id, agent)| {
                    agent.variables.iter().filter_map(move |(name, value)| {
                        if self.touches(name) {
                            value.as_number().map(|n| (id.clone(), name.clone(), n))
                        } else {
                            None
                        }
                    })
                })
                .collect();
            for (agent, variable, current) in targets {
                next = next.with_agent_variable(
                    &agent,
                    &variable,
                    Value::Number(current * self.factor),
                )?;
            }
        }
        if self.scope.covers_global() {
            let targets: Vec<(String, f64)> = next
                .global
                .variables
                .iter()
                .filter_map(|(name, value)| {
                    if self.touches(name) {
                        value.as_number().map(|n| (name.clone(), n))
                    } else {
                        None
                    }
                })
                .collect();
            for (variable, current) in targets {
                next = next.with_global_variable(&variable, Value::Number(current * self.factor))?;
            }
        }
        Ok(next)
    }
}

/// Snaps numeric variables back inside their declared bounds.
///
/// The windows are captured from the schema at construction; variables
/// without declared bounds are never touched.
#[derive(Debug, Clone)]
struct ClampRule {
    agent_windows: BTreeMap<AgentId, BTreeMap<String, Bounds>>,
    global_windows: BTreeMap<String, Bounds>,
}

impl EngineRule for ClampRule {
    fn name(&self) -> &'static str {
        "clamp"
    }

    fn apply(&self, state: SimulationState) -> Result<SimulationState, StateError> {
        let mut next = state;
        for (agent, windows) in &self.agent_windows {
            for (variable, window) in windows {
                let current = next.agent_number(agent, variable)?;
                if !window.contains(current) {
                    next = next.with_agent_variable(
                        agent,
                        variable,
                        Value::Number(window.clamp(current)),
                    )?;
                }
            }
        }
        for (variable, window) in &self.global_windows {
            let current = next.global_number(variable)?;
            if !window.contains(current) {
                next = next.with_global_variable(variable, Value::Number(window.clamp(current)))?;
            }
        }
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A rule constructor: config entry and schema in, boxed rule out.
type RuleBuilder = fn(&RuleConfig, &SchemaIndex) -> Result<Box<dyn EngineRule>, ConfigError>;

/// The closed registry of known rules, in listing order.
const REGISTRY: &[(&str, RuleBuilder)] = &[
    ("growth", build_growth),
    ("decay", build_decay),
    ("clamp", build_clamp),
];

/// The known rule identifiers, comma separated, for error messages.
pub fn known_rules() -> String {
    REGISTRY
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Construct one rule from its config entry.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownRule`] for identifiers outside the
/// registry, or [`ConfigError::InvalidRule`] when the parameters cannot
/// produce a usable rule.
pub fn build_rule(
    config: &RuleConfig,
    schema: &SchemaIndex,
) -> Result<Box<dyn EngineRule>, ConfigError> {
    let Some((_, builder)) = REGISTRY.iter().find(|(name, _)| *name == config.rule) else {
        return Err(ConfigError::UnknownRule {
            kind: config.rule.clone(),
            known: known_rules(),
        });
    };
    builder(config, schema)
}

/// Construct every configured rule, preserving declaration order.
///
/// # Errors
///
/// Fails on the first entry [`build_rule`] rejects.
pub fn build_rules(
    configs: &[RuleConfig],
    schema: &SchemaIndex,
) -> Result<Vec<Box<dyn EngineRule>>, ConfigError> {
    configs
        .iter()
        .map(|config| build_rule(config, schema))
        .collect()
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

fn build_growth(
    config: &RuleConfig,
    schema: &SchemaIndex,
) -> Result<Box<dyn EngineRule>, ConfigError> {
    let rate = config.rate;
    if !rate.is_finite() || rate < 0.0 {
        return Err(ConfigError::InvalidRule {
            rule: config.rule.clone(),
            reason: format!("rate {rate} must be finite and non-negative"),
        });
    }
    validate_target(config, schema)?;
    Ok(Box::new(ScaleRule {
        name: "growth",
        factor: 1.0 + rate,
        scope: config.scope,
        variable: config.variable.clone(),
    }))
}

fn build_decay(
    config: &RuleConfig,
    schema: &SchemaIndex,
) -> Result<Box<dyn EngineRule>, ConfigError> {
    let rate = config.rate;
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        return Err(ConfigError::InvalidRule {
            rule: config.rule.clone(),
            reason: format!("rate {rate} must be within [0, 1]"),
        });
    }
    validate_target(config, schema)?;
    Ok(Box::new(ScaleRule {
        name: "decay",
        factor: 1.0 - rate,
        scope: config.scope,
        variable: config.variable.clone(),
    }))
}

fn build_clamp(
    config: &RuleConfig,
    schema: &SchemaIndex,
) -> Result<Box<dyn EngineRule>, ConfigError> {
    let restrict = config.variable.as_deref();
    let keep = |name: &str| restrict.is_none_or(|only| only == name);

    let mut agent_windows = BTreeMap::new();
    if config.scope.covers_agents() {
        for (agent, vars) in schema.agents() {
            let windows: BTreeMap<String, Bounds> = vars
                .iter()
                .filter_map(|(name, spec)| {
                    if keep(name) {
                        spec.bounds.map(|window| (name.clone(), window))
                    } else {
                        None
                    }
                })
                .collect();
            if !windows.is_empty() {
                agent_windows.insert(agent.clone(), windows);
            }
        }
    }
    let global_windows: BTreeMap<String, Bounds> = if config.scope.covers_global() {
        schema
            .global()
            .iter()
            .filter_map(|(name, spec)| {
                if keep(name) {
                    spec.bounds.map(|window| (name.clone(), window))
                } else {
                    None
                }
            })
            .collect()
    } else {
        BTreeMap::new()
    };

    if agent_windows.is_empty() && global_windows.is_empty() {
        return Err(ConfigError::InvalidRule {
            rule: config.rule.clone(),
            reason: "no variable in scope declares bounds to clamp to".to_owned(),
        });
    }
    Ok(Box::new(ClampRule {
        agent_windows,
        global_windows,
    }))
}

/// Reject a variable restriction nothing in scope declares as numeric.
fn validate_target(config: &RuleConfig, schema: &SchemaIndex) -> Result<(), ConfigError> {
    let Some(variable) = config.variable.as_deref() else {
        return Ok(());
    };
    let is_number = |spec: &VariableSpec| spec.kind == VariableKind::Number;
    let declared = (config.scope.covers_agents()
        && schema
            .agents()
            .values()
            .any(|vars| vars.get(variable).is_some_and(is_number)))
        || (config.scope.covers_global() && schema.global_spec(variable).is_some_and(is_number));
    if declared {
        Ok(())
    } else {
        Err(ConfigError::InvalidRule {
            rule: config.rule.clone(),
            reason: format!("no numeric variable `{variable}` is declared in scope"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    fn make_schema() -> SchemaIndex {
        let yaml = "
agents:
  - name: alice
    variables:
      energy:
        kind: number
        initial: 10
        bounds: {min: 0, max: 100}
      motto:
        kind: text
        initial: onward
  - name: bob
    variables:
      energy:
        kind: number
        initial: 40
global:
  temperature:
    kind: number
    initial: 20
";
        SimulationConfig::parse(yaml).unwrap().schema_index()
    }

    fn rule_config(rule: &str, rate: f64) -> RuleConfig {
        RuleConfig {
            rule: rule.to_owned(),
            variable: None,
            scope: RuleScope::All,
            rate,
        }
    }

    #[test]
    fn growth_scales_every_numeric_variable() {
        let schema = make_schema();
        let rule = build_rule(&rule_config("growth", 0.5), &schema).unwrap();
        let state = rule.apply(schema.initial_state()).unwrap();

        assert_eq!(
            state
                .agent_number(&AgentId::from("alice"), "energy")
                .unwrap(),
            15.0
        );
        assert_eq!(
            state.agent_number(&AgentId::from("bob"), "energy").unwrap(),
            60.0
        );
        assert_eq!(state.global_number("temperature").unwrap(), 30.0);
        // Non-numeric variables are never touched.
        assert_eq!(
            state
                .agent(&AgentId::from("alice"))
                .unwrap()
                .variable("motto"),
            Some(&Value::Text("onward".to_owned()))
        );
    }

    #[test]
    fn decay_shrinks_by_the_configured_rate() {
        let schema = make_schema();
        let rule = build_rule(&rule_config("decay", 0.5), &schema).unwrap();
        let state = rule.apply(schema.initial_state()).unwrap();
        assert_eq!(
            state
                .agent_number(&AgentId::from("alice"), "energy")
                .unwrap(),
            5.0
        );
    }

    #[test]
    fn variable_restriction_leaves_the_rest_alone() {
        let schema = make_schema();
        let config = RuleConfig {
            variable: Some("energy".to_owned()),
            scope: RuleScope::Agents,
            ..rule_config("growth", 1.0)
        };
        let rule = build_rule(&config, &schema).unwrap();
        let state = rule.apply(schema.initial_state()).unwrap();

        assert_eq!(
            state
                .agent_number(&AgentId::from("alice"), "energy")
                .unwrap(),
            20.0
        );
        // Global scope excluded by the scope restriction.
        assert_eq!(state.global_number("temperature").unwrap(), 20.0);
    }

    #[test]
    fn clamp_snaps_values_back_into_their_windows() {
        let schema = make_schema();
        let rule = build_rule(&rule_config("clamp", 0.0), &schema).unwrap();

        let alice = AgentId::from("alice");
        let state = schema
            .initial_state()
            .with_agent_variable(&alice, "energy", Value::Number(250.0))
            .unwrap();
        let state = rule.apply(state).unwrap();
        assert_eq!(state.agent_number(&alice, "energy").unwrap(), 100.0);

        // In-window values pass through unchanged.
        let state = rule.apply(state).unwrap();
        assert_eq!(state.agent_number(&alice, "energy").unwrap(), 100.0);
    }

    #[test]
    fn unknown_rule_identifiers_list_the_registry() {
        let schema = make_schema();
        let err = build_rule(&rule_config("entropy", 0.0), &schema).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRule { .. }));
        assert_eq!(
            err.to_string(),
            "unknown engine rule `entropy`; known rules: growth, decay, clamp"
        );
    }

    #[test]
    fn out_of_range_rates_are_rejected() {
        let schema = make_schema();
        assert!(matches!(
            build_rule(&rule_config("growth", -0.5), &schema),
            Err(ConfigError::InvalidRule { .. })
        ));
        assert!(matches!(
            build_rule(&rule_config("decay", 1.5), &schema),
            Err(ConfigError::InvalidRule { .. })
        ));
        assert!(matches!(
            build_rule(&rule_config("growth", f64::NAN), &schema),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn restrictions_on_undeclared_variables_are_rejected() {
        let schema = make_schema();
        let config = RuleConfig {
            variable: Some("charisma".to_owned()),
            ..rule_config("growth", 0.1)
        };
        assert!(matches!(
            build_rule(&config, &schema),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn build_rules_preserves_declaration_order() {
        let schema = make_schema();
        let configs = vec![rule_config("decay", 0.1), rule_config("clamp", 0.0)];
        let rules = build_rules(&configs, &schema).unwrap();
        let names: Vec<&str> = rules.iter().map(|rule| rule.name()).collect();
        assert_eq!(names, vec!["decay", "clamp"]);
    }
}
