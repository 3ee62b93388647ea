use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Boolean(bool),
    String(String),
}

impl FlagValue {
    /// A non-empty variant counts as enabled.
    pub fn is_truthy(&self) -> bool {
        match self {
            FlagValue::Boolean(enabled) => *enabled,
            FlagValue::String(variant) => !variant.is_empty(),
        }
    }

    pub fn variant(&self) -> Option<&str> {
        match self {
            FlagValue::String(variant) if !variant.is_empty() => Some(variant),
            _ => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Boolean(enabled) => write!(f, "{enabled}"),
            FlagValue::String(variant) => write!(f, "{variant}"),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Boolean(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EvaluationReason {
    #[serde(default, alias = "kind")]
    pub code: Option<String>,
    #[serde(default, alias = "condition_match_type")]
    pub description: Option<String>,
    #[serde(default)]
    pub condition_index: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlagMetadata {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// One flag's outcome, either evaluated locally or returned by the flags endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResolvedFlag {
    pub key: String,
    pub enabled: bool,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub metadata: FlagMetadata,
    #[serde(default)]
    pub reason: Option<EvaluationReason>,
}

impl ResolvedFlag {
    pub fn value(&self) -> FlagValue {
        match &self.variant {
            Some(variant) if !variant.is_empty() => FlagValue::String(variant.clone()),
            _ => FlagValue::Boolean(self.enabled),
        }
    }
}

/// Identity context for a flag check. Everything except the distinct id is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagEvaluationOptions {
    pub groups: Option<HashMap<String, String>>,
    pub person_properties: Option<HashMap<String, Value>>,
    pub group_properties: Option<HashMap<String, HashMap<String, Value>>>,
}

impl FlagEvaluationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_person_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.person_properties
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_group(mut self, group_type: impl Into<String>, group_key: impl Into<String>) -> Self {
        self.groups
            .get_or_insert_with(HashMap::new)
            .insert(group_type.into(), group_key.into());
        self
    }

    pub fn with_group_property(
        mut self,
        group_type: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.group_properties
            .get_or_insert_with(HashMap::new)
            .entry(group_type.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteFlagsRequest {
    pub api_key: String,
    pub distinct_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_properties: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_properties: Option<HashMap<String, HashMap<String, Value>>>,
}

impl RemoteFlagsRequest {
    pub fn new(api_key: &str, distinct_id: &str, options: &FlagEvaluationOptions) -> Self {
        Self {
            api_key: api_key.to_string(),
            distinct_id: distinct_id.to_string(),
            groups: options.groups.clone(),
            person_properties: options.person_properties.clone(),
            group_properties: options.group_properties.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFlagsResponse {
    #[serde(default)]
    pub flags: HashMap<String, ResolvedFlag>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub errors_while_computing_flags: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_limited: Option<Vec<String>>, // list of quota limited resources
}

impl RemoteFlagsResponse {
    pub fn is_quota_limited(&self) -> bool {
        self.quota_limited
            .as_ref()
            .is_some_and(|limited| limited.iter().any(|resource| resource == "feature_flags"))
    }
}
