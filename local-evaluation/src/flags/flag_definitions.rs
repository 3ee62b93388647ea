use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::api::types::FlagEvaluationOptions;
use crate::cohorts::cohort_models::{CohortDefinition, CohortId};
use crate::flags::flag_dependencies::DependencyCache;
use crate::flags::flag_match_reason::FeatureFlagMatchReason;
use crate::flags::flag_matching::{FeatureFlagMatch, FeatureFlagMatcher};
use crate::flags::flag_models::{FeatureFlag, LocalEvaluationResponse};
use crate::properties::property_matching::FlagMatchingError;

/// One complete, immutable set of flag and cohort definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagDefinitions {
    pub flags_by_key: HashMap<String, FeatureFlag>,
    pub cohorts: HashMap<CohortId, CohortDefinition>,
    pub group_type_mapping: HashMap<String, String>,
}

impl From<LocalEvaluationResponse> for FlagDefinitions {
    fn from(response: LocalEvaluationResponse) -> Self {
        FlagDefinitions {
            flags_by_key: response
                .flags
                .into_iter()
                .map(|flag| (flag.key.clone(), flag))
                .collect(),
            cohorts: response.cohorts,
            group_type_mapping: response.group_type_mapping,
        }
    }
}

impl FlagDefinitions {
    pub fn get_flag(&self, key: &str) -> Option<&FeatureFlag> {
        self.flags_by_key.get(key)
    }

    pub fn matcher(&self) -> FeatureFlagMatcher<'_> {
        FeatureFlagMatcher::new(&self.cohorts, Some(&self.flags_by_key))
    }

    /// Evaluates one flag for the given identity with a fresh dependency memo.
    ///
    /// Group-aggregated flags hash on the group key and match against that
    /// group's properties; a person-level flag uses the distinct id and the
    /// person properties.
    pub fn evaluate_flag(
        &self,
        flag: &FeatureFlag,
        distinct_id: &str,
        options: &FlagEvaluationOptions,
    ) -> Result<FeatureFlagMatch, FlagMatchingError> {
        if !flag.active || flag.deleted {
            return Ok(FeatureFlagMatch::no_match(FeatureFlagMatchReason::FlagDisabled));
        }

        let empty = HashMap::new();
        let mut dependency_cache = DependencyCache::new();

        let Some(group_type_index) = flag.get_group_type_index() else {
            let properties = options.person_properties.as_ref().unwrap_or(&empty);
            return self
                .matcher()
                .get_match(flag, distinct_id, properties, &mut dependency_cache);
        };

        let Some(group_type) = self.group_type_mapping.get(&group_type_index.to_string()) else {
            debug!(
                "Unknown group type index {} for flag {}",
                group_type_index, flag.key
            );
            return Err(FlagMatchingError::UnknownGroupType(group_type_index));
        };

        let Some(group_key) = options
            .groups
            .as_ref()
            .and_then(|groups| groups.get(group_type))
        else {
            debug!(
                "Can't compute group flag {} without group {}",
                flag.key, group_type
            );
            return Ok(FeatureFlagMatch::no_match(FeatureFlagMatchReason::NoGroupType));
        };

        let group_properties = options
            .group_properties
            .as_ref()
            .and_then(|all| all.get(group_type))
            .unwrap_or(&empty);

        self.matcher()
            .get_match(flag, group_key, group_properties, &mut dependency_cache)
    }
}

/// Holds the current definitions snapshot.
///
/// Readers clone the `Arc` and keep evaluating against it even if a refresh
/// swaps in a new snapshot meanwhile; nothing is ever mutated in place.
#[derive(Debug, Default)]
pub struct FlagDefinitionsStore {
    current: RwLock<Option<Arc<FlagDefinitions>>>,
}

impl FlagDefinitionsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Option<Arc<FlagDefinitions>> {
        self.current.read().clone()
    }

    pub fn replace(&self, definitions: FlagDefinitions) {
        *self.current.write() = Some(Arc::new(definitions));
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}
