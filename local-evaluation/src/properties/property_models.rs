use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OperatorType {
    Exact,
    IsNot,
    Icontains,
    NotIcontains,
    Regex,
    NotRegex,
    Gt,
    Lt,
    Gte,
    Lte,
    IsSet,
    IsNotSet,
    IsDateExact,
    IsDateAfter,
    IsDateBefore,
    In,
    NotIn,
    FlagEvaluatesTo,
    /// Anything this engine does not know how to evaluate. Always inconclusive.
    Unknown,
}

impl<'de> Deserialize<'de> for OperatorType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(OperatorType::from_str(&raw).unwrap_or(OperatorType::Unknown))
    }
}

impl Serialize for OperatorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_ref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum PropertyType {
    #[default]
    Person,
    Cohort,
    Flag,
}

impl<'de> Deserialize<'de> for PropertyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Group and event property types are matched against the supplied values like person ones.
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .and_then(|raw| PropertyType::from_str(&raw).ok())
            .unwrap_or_default())
    }
}

impl Serialize for PropertyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_ref())
    }
}

/// The literal side of a property condition.
///
/// Flag definitions only ever carry these four shapes; list elements are
/// stringified on the way in so membership checks stay string-typed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<String>),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(number) => number.as_f64(),
            PropertyValue::String(raw) => raw.trim().parse::<f64>().ok(),
            PropertyValue::Bool(_) | PropertyValue::List(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(raw) => Some(raw),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(value) => write!(f, "{value}"),
            PropertyValue::Number(value) => write!(f, "{value}"),
            PropertyValue::String(value) => write!(f, "{value}"),
            PropertyValue::List(values) => write!(f, "[{}]", values.join(", ")),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => PropertyValue::Bool(b),
            Value::Number(n) => PropertyValue::Number(n),
            Value::String(s) => PropertyValue::String(s),
            Value::Array(items) => PropertyValue::List(
                items
                    .into_iter()
                    .filter(|item| !item.is_null())
                    .map(|item| match item {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Null => PropertyValue::String(String::new()),
            other @ Value::Object(_) => PropertyValue::String(other.to_string()),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(PropertyValue::from)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PropertyFilter {
    pub key: String,
    #[serde(default)]
    pub value: Option<PropertyValue>,
    #[serde(default)]
    pub operator: Option<OperatorType>,
    #[serde(rename = "type", default)]
    pub prop_type: PropertyType,
    #[serde(default)]
    pub negation: Option<bool>,
    /// Flag keys to settle, in order, before a `flag` condition can be checked.
    /// Empty when the server detected a dependency cycle.
    #[serde(default)]
    pub dependency_chain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_type_index: Option<i32>,
}

impl PropertyFilter {
    pub fn operator(&self) -> OperatorType {
        self.operator.unwrap_or(OperatorType::Exact)
    }

    pub fn is_negated(&self) -> bool {
        self.negation.unwrap_or(false)
    }

    pub fn is_cohort(&self) -> bool {
        self.prop_type == PropertyType::Cohort
    }

    pub fn is_flag_dependency(&self) -> bool {
        self.prop_type == PropertyType::Flag
    }
}
