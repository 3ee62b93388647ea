use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::api::types::{EvaluationReason, FlagValue};
use crate::cohorts::cohort_models::{CohortDefinition, CohortId, CohortPropertyType};
use crate::cohorts::cohort_operations::fold_condition_results;
use crate::flags::flag_dependencies::DependencyCache;
use crate::flags::flag_match_reason::FeatureFlagMatchReason;
use crate::flags::flag_matching_utils::{get_matching_variant, is_in_rollout};
use crate::flags::flag_models::{FeatureFlag, FlagPropertyGroup};
use crate::properties::property_matching::FlagMatchingError;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFlagMatch {
    pub matches: bool,
    pub variant: Option<String>,
    pub reason: FeatureFlagMatchReason,
    pub condition_index: Option<usize>,
    pub payload: Option<Value>,
}

impl FeatureFlagMatch {
    pub fn get_flag_value(&self) -> FlagValue {
        match (self.matches, &self.variant) {
            (true, Some(variant)) => FlagValue::String(variant.clone()),
            (true, None) => FlagValue::Boolean(true),
            (false, _) => FlagValue::Boolean(false),
        }
    }

    pub fn no_match(reason: FeatureFlagMatchReason) -> Self {
        FeatureFlagMatch {
            matches: false,
            variant: None,
            reason,
            condition_index: None,
            payload: None,
        }
    }

    pub fn evaluation_reason(&self) -> EvaluationReason {
        EvaluationReason {
            code: Some(self.reason.to_string()),
            description: Some(self.reason.describe(self.condition_index)),
            condition_index: self.condition_index,
        }
    }
}

/// Evaluates flags against one snapshot of definitions.
///
/// The matcher only borrows the cohorts and flags it needs for cohort and
/// flag-dependency conditions, so it is cheap to build per call. All state that
/// lives across a single evaluation is kept in the [`DependencyCache`] passed in.
pub struct FeatureFlagMatcher<'a> {
    pub(crate) cohorts: &'a HashMap<CohortId, CohortDefinition>,
    pub(crate) flags_by_key: Option<&'a HashMap<String, FeatureFlag>>,
}

impl<'a> FeatureFlagMatcher<'a> {
    pub fn new(
        cohorts: &'a HashMap<CohortId, CohortDefinition>,
        flags_by_key: Option<&'a HashMap<String, FeatureFlag>>,
    ) -> Self {
        FeatureFlagMatcher {
            cohorts,
            flags_by_key,
        }
    }

    /// Returns `true`, `false` or the variant key this identity gets.
    ///
    /// Errors mean the flag can't be decided from local data and should be
    /// resolved remotely.
    pub fn match_feature_flag_properties(
        &self,
        flag: &FeatureFlag,
        distinct_id: &str,
        properties: &HashMap<String, Value>,
        dependency_cache: &mut DependencyCache,
    ) -> Result<FlagValue, FlagMatchingError> {
        self.get_match(flag, distinct_id, properties, dependency_cache)
            .map(|flag_match| flag_match.get_flag_value())
    }

    /// Full evaluation of a single flag.
    ///
    /// Condition groups with a variant override are tried first; otherwise the
    /// declared order is kept. The first group whose properties all match and
    /// whose rollout admits this identity wins. An inconclusive group does not
    /// stop the loop, but if nothing matched afterwards the whole flag is
    /// inconclusive rather than `false`.
    pub fn get_match(
        &self,
        flag: &FeatureFlag,
        distinct_id: &str,
        properties: &HashMap<String, Value>,
        dependency_cache: &mut DependencyCache,
    ) -> Result<FeatureFlagMatch, FlagMatchingError> {
        if !flag.active || flag.deleted {
            return Ok(FeatureFlagMatch::no_match(FeatureFlagMatchReason::FlagDisabled));
        }

        if flag.ensure_experience_continuity {
            return Err(FlagMatchingError::ExperienceContinuity(flag.key.clone()));
        }

        let mut conditions: Vec<(usize, &FlagPropertyGroup)> =
            flag.get_conditions().iter().enumerate().collect();
        // Stable: ties keep their declared order.
        conditions.sort_by_key(|(_, condition)| if condition.variant.is_some() { 0 } else { 1 });

        let mut inconclusive: Option<FlagMatchingError> = None;
        let mut highest_match = FeatureFlagMatchReason::NoConditionMatch;
        let mut highest_index = None;

        for (index, condition) in conditions {
            match self.is_condition_match(flag, condition, distinct_id, properties, dependency_cache)
            {
                Ok((true, _)) => {
                    let variant = match &condition.variant {
                        Some(variant_override) if flag.has_variant(variant_override) => {
                            Some(variant_override.clone())
                        }
                        _ => get_matching_variant(flag, distinct_id),
                    };
                    let mut flag_match = FeatureFlagMatch {
                        matches: true,
                        variant,
                        reason: FeatureFlagMatchReason::ConditionMatch,
                        condition_index: Some(index),
                        payload: None,
                    };
                    flag_match.payload = flag.get_payload(&flag_match.get_flag_value());
                    return Ok(flag_match);
                }
                Ok((false, reason)) => {
                    if reason > highest_match {
                        highest_match = reason;
                        highest_index = Some(index);
                    }
                }
                Err(e) => {
                    debug!(
                        "Condition {} of flag {} is inconclusive: {}",
                        index, flag.key, e
                    );
                    inconclusive.get_or_insert(e);
                }
            }
        }

        if let Some(e) = inconclusive {
            return Err(e);
        }

        Ok(FeatureFlagMatch {
            condition_index: highest_index,
            ..FeatureFlagMatch::no_match(highest_match)
        })
    }

    /// Checks one condition group: properties first, then the rollout gate.
    pub fn is_condition_match(
        &self,
        flag: &FeatureFlag,
        condition: &FlagPropertyGroup,
        distinct_id: &str,
        properties: &HashMap<String, Value>,
        dependency_cache: &mut DependencyCache,
    ) -> Result<(bool, FeatureFlagMatchReason), FlagMatchingError> {
        if let Some(filters) = condition.properties.as_ref().filter(|f| !f.is_empty()) {
            let all_match = fold_condition_results(
                CohortPropertyType::AND,
                filters.iter().map(|filter| {
                    self.match_leaf(filter, distinct_id, properties, dependency_cache)
                }),
            )?;
            if !all_match {
                return Ok((false, FeatureFlagMatchReason::NoConditionMatch));
            }
        }

        if is_in_rollout(&flag.key, distinct_id, condition.rollout_percentage) {
            Ok((true, FeatureFlagMatchReason::ConditionMatch))
        } else {
            Ok((false, FeatureFlagMatchReason::OutOfRolloutBound))
        }
    }
}
