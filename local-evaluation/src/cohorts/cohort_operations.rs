use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::cohorts::cohort_models::{CohortDefinition, CohortPropertyType, CohortValues};
use crate::flags::flag_dependencies::DependencyCache;
use crate::flags::flag_matching::FeatureFlagMatcher;
use crate::properties::property_matching::{match_property, FlagMatchingError};
use crate::properties::property_models::{OperatorType, PropertyFilter};

/// Folds branch results into one AND/OR outcome.
///
/// OR returns `true` on the first true branch, whatever came before. AND returns
/// `false` on the first false branch as long as no branch so far was inconclusive;
/// once one was, the group ends inconclusive. With no decisive branch, any
/// inconclusive branch makes the whole group inconclusive.
///
/// The AND outcome depends on branch order: `[false, inconclusive]` is `false`
/// while `[inconclusive, false]` is inconclusive. Branches are walked in declared
/// order and stop at the first decisive one.
pub fn fold_condition_results<I>(
    operator: CohortPropertyType,
    results: I,
) -> Result<bool, FlagMatchingError>
where
    I: IntoIterator<Item = Result<bool, FlagMatchingError>>,
{
    let mut inconclusive: Option<FlagMatchingError> = None;

    for result in results {
        match (operator, result) {
            (CohortPropertyType::OR, Ok(true)) => return Ok(true),
            (CohortPropertyType::AND, Ok(false)) if inconclusive.is_none() => return Ok(false),
            (_, Ok(_)) => {}
            (_, Err(e)) => {
                inconclusive.get_or_insert(e);
            }
        }
    }

    match inconclusive {
        Some(e) => Err(e),
        None => Ok(operator == CohortPropertyType::AND),
    }
}

impl FeatureFlagMatcher<'_> {
    /// Matches a cohort condition tree. An empty node is vacuously true.
    pub fn match_property_group(
        &self,
        group: &CohortDefinition,
        distinct_id: &str,
        properties: &HashMap<String, Value>,
        dependency_cache: &mut DependencyCache,
    ) -> Result<bool, FlagMatchingError> {
        if group.values.is_empty() {
            return Ok(true);
        }

        match &group.values {
            CohortValues::Groups(groups) => fold_condition_results(
                group.prop_type,
                groups.iter().map(|nested| {
                    self.match_property_group(nested, distinct_id, properties, dependency_cache)
                }),
            ),
            CohortValues::Properties(filters) => fold_condition_results(
                group.prop_type,
                filters.iter().map(|filter| {
                    self.match_leaf(filter, distinct_id, properties, dependency_cache)
                }),
            ),
        }
    }

    /// Evaluates one leaf condition, negation included.
    pub fn match_leaf(
        &self,
        filter: &PropertyFilter,
        distinct_id: &str,
        properties: &HashMap<String, Value>,
        dependency_cache: &mut DependencyCache,
    ) -> Result<bool, FlagMatchingError> {
        let matches = if filter.is_cohort() {
            self.match_cohort(filter, distinct_id, properties, dependency_cache)
        } else if filter.is_flag_dependency() {
            self.evaluate_flag_dependency(filter, distinct_id, properties, dependency_cache)
        } else {
            match_property(filter, properties)
        };

        if let Err(e) = &matches {
            debug!("Failed to compute property {} locally: {}", filter.key, e);
        }

        matches.map(|matched| matched != filter.is_negated())
    }

    fn match_cohort(
        &self,
        filter: &PropertyFilter,
        distinct_id: &str,
        properties: &HashMap<String, Value>,
        dependency_cache: &mut DependencyCache,
    ) -> Result<bool, FlagMatchingError> {
        let cohort_id = filter
            .value
            .as_ref()
            .map(|value| value.to_string())
            .unwrap_or_default();

        let Some(cohort) = self.cohorts.get(&cohort_id) else {
            return Err(FlagMatchingError::MissingCohort(cohort_id));
        };

        let in_cohort =
            self.match_property_group(cohort, distinct_id, properties, dependency_cache)?;

        Ok(match filter.operator() {
            OperatorType::NotIn => !in_cohort,
            _ => in_cohort,
        })
    }
}
