//! Visibility filtering of variable sets.
//!
//! Projects a scope's full variable mapping down to what one observability
//! level permits. Classification comes from the [`VisibilityPolicy`]; names
//! absent from both classification sets count as external, so configs
//! written before classification existed keep full visibility.

use std::collections::BTreeMap;

use veil_types::{ObservabilityLevel, Value, VisibilityClass, VisibilityPolicy};

/// Project `variables` down to the subset `level` permits.
///
/// Insider sees everything; external sees externally classified names only.
/// Unaware targets are excluded wholesale by the observation builder before
/// filtering is attempted; if an unaware level nevertheless reaches this
/// function it yields an empty set rather than guessing.
pub fn filter_variables(
    variables: &BTreeMap<String, Value>,
    level: ObservabilityLevel,
    policy: &VisibilityPolicy,
) -> BTreeMap<String, Value> {
    match level {
        ObservabilityLevel::Insider => variables.clone(),
        ObservabilityLevel::External => variables
            .iter()
            .filter(|(name, _)| policy.classify(name) == VisibilityClass::External)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        ObservabilityLevel::Unaware => BTreeMap::new(),
    }
}
