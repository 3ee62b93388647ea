use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::types::FlagValue;
use crate::cohorts::cohort_models::{CohortDefinition, CohortId};
use crate::properties::property_models::PropertyFilter;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct FlagPropertyGroup {
    #[serde(default)]
    pub properties: Option<Vec<PropertyFilter>>,
    #[serde(default)]
    pub rollout_percentage: Option<f64>,
    #[serde(default)]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MultivariateFlagVariant {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    pub rollout_percentage: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MultivariateFlagOptions {
    #[serde(default)]
    pub variants: Vec<MultivariateFlagVariant>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct FlagFilters {
    #[serde(default)]
    pub groups: Vec<FlagPropertyGroup>,
    #[serde(default)]
    pub multivariate: Option<MultivariateFlagOptions>,
    #[serde(default)]
    pub aggregation_group_type_index: Option<i32>,
    /// Keyed by variant key, or by `"true"` for plain boolean flags.
    #[serde(default)]
    pub payloads: Option<HashMap<String, Value>>,
}

/// A flag as served by the local evaluation endpoint. Never mutated after load.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FeatureFlag {
    pub id: i32,
    #[serde(default)]
    pub name: Option<String>,
    pub key: String,
    #[serde(default)]
    pub filters: FlagFilters,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub ensure_experience_continuity: bool,
    #[serde(default)]
    pub version: Option<i32>,
}

impl FeatureFlag {
    pub fn get_group_type_index(&self) -> Option<i32> {
        self.filters.aggregation_group_type_index
    }

    pub fn get_conditions(&self) -> &Vec<FlagPropertyGroup> {
        &self.filters.groups
    }

    pub fn get_variants(&self) -> Vec<MultivariateFlagVariant> {
        self.filters
            .multivariate
            .clone()
            .map_or(vec![], |m| m.variants)
    }

    pub fn has_variant(&self, key: &str) -> bool {
        self.filters
            .multivariate
            .as_ref()
            .is_some_and(|m| m.variants.iter().any(|variant| variant.key == key))
    }

    pub fn get_payload(&self, value: &FlagValue) -> Option<Value> {
        self.filters
            .payloads
            .as_ref()?
            .get(&value.to_string())
            .filter(|payload| !payload.is_null())
            .cloned()
    }
}

/// Body of `GET /api/feature_flag/local_evaluation`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct LocalEvaluationResponse {
    #[serde(default)]
    pub flags: Vec<FeatureFlag>,
    #[serde(default)]
    pub group_type_mapping: HashMap<String, String>,
    #[serde(default)]
    pub cohorts: HashMap<CohortId, CohortDefinition>,
}
