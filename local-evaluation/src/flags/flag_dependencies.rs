use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::api::types::FlagValue;
use crate::flags::flag_matching::FeatureFlagMatcher;
use crate::properties::property_matching::FlagMatchingError;
use crate::properties::property_models::{OperatorType, PropertyFilter, PropertyValue};

/// What one evaluation call has learned about a dependency so far.
/// A key that is absent from the cache has not been looked at yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyResult {
    Inconclusive,
    Settled(FlagValue),
}

/// Memo of dependency outcomes, scoped to a single top-level flag evaluation.
///
/// Doubles as the cycle guard: a flag is marked inconclusive before its
/// conditions are evaluated, so meeting it again further down the recursion
/// reads as "previously inconclusive" instead of recursing forever.
#[derive(Debug, Default)]
pub struct DependencyCache {
    results: HashMap<String, DependencyResult>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, flag_key: &str) -> Option<&DependencyResult> {
        self.results.get(flag_key)
    }

    pub fn insert(&mut self, flag_key: &str, result: DependencyResult) {
        self.results.insert(flag_key.to_string(), result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl FeatureFlagMatcher<'_> {
    /// Settles every flag in the condition's dependency chain, in order, then
    /// checks the dependency's own value against the expected one.
    pub fn evaluate_flag_dependency(
        &self,
        property: &PropertyFilter,
        distinct_id: &str,
        properties: &HashMap<String, Value>,
        dependency_cache: &mut DependencyCache,
    ) -> Result<bool, FlagMatchingError> {
        let Some(dependency_chain) = &property.dependency_chain else {
            warn!(
                "Flag dependency on {} is missing its dependency chain",
                property.key
            );
            return Err(FlagMatchingError::MissingDependency(property.key.clone()));
        };

        if dependency_chain.is_empty() {
            warn!("Circular dependency detected for flag: {}", property.key);
            return Err(FlagMatchingError::DependencyCycle(property.key.clone()));
        }

        for dependency_key in dependency_chain {
            if dependency_cache.get(dependency_key).is_none() {
                self.settle_dependency(dependency_key, distinct_id, properties, dependency_cache)?;
            }

            match dependency_cache.get(dependency_key) {
                Some(DependencyResult::Settled(value)) if value.is_truthy() => {}
                Some(DependencyResult::Settled(_)) => return Ok(false),
                Some(DependencyResult::Inconclusive) | None => {
                    return Err(FlagMatchingError::DependencyInconclusive(
                        dependency_key.clone(),
                    ))
                }
            }
        }

        let Some(expected) = &property.value else {
            return Ok(true);
        };

        let Some(DependencyResult::Settled(actual)) = dependency_cache.get(&property.key) else {
            debug!(
                "Flag {} was not evaluated despite being a dependency",
                property.key
            );
            return Err(FlagMatchingError::DependencyInconclusive(
                property.key.clone(),
            ));
        };

        if property.operator() != OperatorType::FlagEvaluatesTo {
            return Err(FlagMatchingError::InconclusiveOperatorMatch(
                property.operator().as_ref().to_string(),
            ));
        }

        Ok(matches_dependency_value(expected, actual))
    }

    fn settle_dependency(
        &self,
        dependency_key: &str,
        distinct_id: &str,
        properties: &HashMap<String, Value>,
        dependency_cache: &mut DependencyCache,
    ) -> Result<(), FlagMatchingError> {
        let Some(dependency) = self
            .flags_by_key
            .and_then(|flags_by_key| flags_by_key.get(dependency_key))
        else {
            dependency_cache.insert(dependency_key, DependencyResult::Inconclusive);
            return Err(FlagMatchingError::MissingDependency(
                dependency_key.to_string(),
            ));
        };

        if !dependency.active {
            dependency_cache.insert(dependency_key, DependencyResult::Settled(false.into()));
            return Ok(());
        }

        dependency_cache.insert(dependency_key, DependencyResult::Inconclusive);
        match self.match_feature_flag_properties(dependency, distinct_id, properties, dependency_cache)
        {
            Ok(value) => {
                dependency_cache.insert(dependency_key, DependencyResult::Settled(value));
                Ok(())
            }
            Err(e) => {
                debug!("Cannot evaluate flag dependency {}: {}", dependency_key, e);
                Err(FlagMatchingError::DependencyInconclusive(
                    dependency_key.to_string(),
                ))
            }
        }
    }
}

/// A variant satisfies `true` or its own name (case-sensitive); a boolean only its own value.
pub fn matches_dependency_value(expected: &PropertyValue, actual: &FlagValue) -> bool {
    match (actual, expected) {
        (FlagValue::String(variant), PropertyValue::Bool(expected)) if !variant.is_empty() => {
            *expected
        }
        (FlagValue::String(variant), PropertyValue::String(expected)) if !variant.is_empty() => {
            variant == expected
        }
        (FlagValue::Boolean(actual), PropertyValue::Bool(expected)) => actual == expected,
        _ => false,
    }
}
