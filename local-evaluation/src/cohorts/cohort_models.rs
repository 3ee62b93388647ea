use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::properties::property_models::PropertyFilter;

/// Cohorts are keyed by their stringified id in the local evaluation response.
pub type CohortId = String;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CohortPropertyType {
    AND,
    #[default]
    OR,
}

/// A node of a cohort's boolean condition tree.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CohortDefinition {
    #[serde(rename = "type", default)]
    pub prop_type: CohortPropertyType,
    #[serde(default)]
    pub values: CohortValues,
}

/// The children of a cohort node are either all nested nodes or all leaf conditions.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CohortValues {
    Groups(Vec<CohortDefinition>),
    Properties(Vec<PropertyFilter>),
}

impl Default for CohortValues {
    fn default() -> Self {
        CohortValues::Properties(Vec::new())
    }
}

impl CohortValues {
    pub fn is_empty(&self) -> bool {
        match self {
            CohortValues::Groups(groups) => groups.is_empty(),
            CohortValues::Properties(properties) => properties.is_empty(),
        }
    }
}

fn is_nested_group(value: &Value) -> bool {
    value.get("key").is_none() && value.get("type").is_some() && value.get("values").is_some()
}

impl<'de> Deserialize<'de> for CohortValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<Value>::deserialize(deserializer)?;

        // The first element decides how the whole list is read.
        let nested = raw.first().is_some_and(is_nested_group);
        if nested {
            raw.into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<CohortDefinition>, _>>()
                .map(CohortValues::Groups)
                .map_err(serde::de::Error::custom)
        } else {
            raw.into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<PropertyFilter>, _>>()
                .map(CohortValues::Properties)
                .map_err(serde::de::Error::custom)
        }
    }
}
