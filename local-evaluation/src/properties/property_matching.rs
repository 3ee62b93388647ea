use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use dateparser::parse as parse_date;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::properties::property_models::{OperatorType, PropertyFilter, PropertyValue};
use crate::properties::relative_date;

/// A condition could not be decided with the data available locally.
///
/// This is not a failure of the flag definition: the caller is expected to ask
/// the flags endpoint instead. Every variant carries enough context to say why.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagMatchingError {
    #[error("can't match properties without a value, missing property: {0}")]
    MissingProperty(String),
    #[error("operator {0} can't be evaluated locally")]
    InconclusiveOperatorMatch(String),
    #[error("can't parse date {0}")]
    InvalidDate(String),
    #[error("cohort {0} is not part of the loaded definitions")]
    MissingCohort(String),
    #[error("flag dependency {0} is not part of the loaded definitions")]
    MissingDependency(String),
    #[error("circular dependency detected for flag {0}")]
    DependencyCycle(String),
    #[error("flag dependency {0} could not be evaluated locally")]
    DependencyInconclusive(String),
    #[error("flag {0} requires experience continuity")]
    ExperienceContinuity(String),
    #[error("group type index {0} is not part of the group type mapping")]
    UnknownGroupType(i32),
}

/// Lower-cases in a locale-insensitive way and drops diacritics, so that
/// `"Straße"`, `"STRASSE"` and `"strasse"` all compare equal.
pub fn casefold(input: &str) -> String {
    input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_uppercase()
        .to_lowercase()
}

pub fn to_string_representation(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn to_f64_representation(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Matches one person-style property condition against the supplied values.
///
/// Cohort and flag conditions never reach this function, they are dispatched by
/// the group matcher. A property missing from `values` can't be proven either
/// way and is inconclusive, as is `is_not_set`.
pub fn match_property(
    property: &PropertyFilter,
    values: &HashMap<String, Value>,
) -> Result<bool, FlagMatchingError> {
    let key = &property.key;
    let operator = property.operator();

    let Some(override_value) = values.get(key) else {
        return Err(FlagMatchingError::MissingProperty(key.clone()));
    };

    match operator {
        OperatorType::IsNotSet => {
            return Err(FlagMatchingError::InconclusiveOperatorMatch(
                operator.as_ref().to_string(),
            ))
        }
        _ => {}
    }

    // a null value counts as unset for every operator but is_not
    if override_value.is_null() && operator != OperatorType::IsNot {
        return Ok(false);
    }

    if operator == OperatorType::IsSet {
        return Ok(true);
    }

    let Some(value) = &property.value else {
        return Ok(false);
    };

    match operator {
        OperatorType::Exact => Ok(compute_exact_match(value, override_value)),
        OperatorType::IsNot => Ok(!compute_exact_match(value, override_value)),
        OperatorType::Icontains | OperatorType::NotIcontains => {
            let is_contained = casefold(&to_string_representation(override_value))
                .contains(&casefold(&value.to_string()));
            Ok((operator == OperatorType::Icontains) == is_contained)
        }
        OperatorType::Regex | OperatorType::NotRegex => {
            let pattern = match Regex::new(&value.to_string()) {
                Ok(pattern) => pattern,
                Err(e) => {
                    tracing::debug!("Invalid regex pattern for property {}: {}", key, e);
                    return Ok(false);
                }
            };
            let is_match = pattern.is_match(&to_string_representation(override_value));
            Ok((operator == OperatorType::Regex) == is_match)
        }
        OperatorType::Gt | OperatorType::Gte | OperatorType::Lt | OperatorType::Lte => {
            Ok(compare_values(override_value, value, operator))
        }
        OperatorType::IsDateExact | OperatorType::IsDateAfter | OperatorType::IsDateBefore => {
            compare_dates(override_value, value, operator)
        }
        OperatorType::In
        | OperatorType::NotIn
        | OperatorType::FlagEvaluatesTo
        | OperatorType::Unknown
        | OperatorType::IsSet
        | OperatorType::IsNotSet => Err(FlagMatchingError::InconclusiveOperatorMatch(
            operator.as_ref().to_string(),
        )),
    }
}

fn compute_exact_match(value: &PropertyValue, override_value: &Value) -> bool {
    if override_value.is_null() {
        return false;
    }
    let expected = casefold(&to_string_representation(override_value));
    match value {
        PropertyValue::List(candidates) => candidates
            .iter()
            .any(|candidate| casefold(candidate) == expected),
        scalar => casefold(&scalar.to_string()) == expected,
    }
}

fn compare_values(override_value: &Value, value: &PropertyValue, operator: OperatorType) -> bool {
    let ordering = match (to_f64_representation(override_value), value.as_f64()) {
        (Some(lhs), Some(rhs)) => lhs.partial_cmp(&rhs),
        _ => Some(to_string_representation(override_value).cmp(&value.to_string())),
    };

    let Some(ordering) = ordering else {
        return false;
    };

    match operator {
        OperatorType::Gt => ordering == Ordering::Greater,
        OperatorType::Gte => ordering != Ordering::Less,
        OperatorType::Lt => ordering == Ordering::Less,
        OperatorType::Lte => ordering != Ordering::Greater,
        _ => false,
    }
}

fn compare_dates(
    override_value: &Value,
    value: &PropertyValue,
    operator: OperatorType,
) -> Result<bool, FlagMatchingError> {
    let flag_date = value
        .as_str()
        .and_then(parse_date_literal)
        .ok_or_else(|| FlagMatchingError::InvalidDate(value.to_string()))?;

    let override_date = determine_parsed_date_for_property_matching(override_value)
        .ok_or_else(|| FlagMatchingError::InvalidDate(to_string_representation(override_value)))?;

    Ok(match operator {
        OperatorType::IsDateBefore => override_date < flag_date,
        OperatorType::IsDateAfter => override_date > flag_date,
        OperatorType::IsDateExact => override_date == flag_date,
        _ => false,
    })
}

/// Relative dates first, then the absolute formats the flags UI produces.
pub fn parse_date_literal(raw: &str) -> Option<DateTime<Utc>> {
    relative_date::parse_relative_date(raw).or_else(|| parse_absolute_date(raw))
}

/// Naive date-times are taken as UTC.
pub fn parse_absolute_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S %:z", "%Y-%m-%d %H:%M:%S%:z"] {
        if let Ok(date) = DateTime::parse_from_str(raw, format) {
            return Some(date.with_timezone(&Utc));
        }
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    parse_date(raw).ok()
}

fn determine_parsed_date_for_property_matching(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => match raw.trim().parse::<f64>() {
            Ok(seconds) => parse_float_timestamp(seconds),
            Err(_) => parse_date_literal(raw),
        },
        Value::Number(number) => number.as_f64().and_then(parse_float_timestamp),
        _ => None,
    }
}

fn parse_float_timestamp(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let millis = (seconds * 1000.0).round();
    if millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}
