use std::collections::HashMap;

use rstest::rstest;
use serde_json::{json, Value};

use crate::api::types::{FlagEvaluationOptions, FlagValue};
use crate::flags::flag_definitions::FlagDefinitions;
use crate::flags::flag_dependencies::{DependencyCache, DependencyResult};
use crate::flags::flag_match_reason::FeatureFlagMatchReason;
use crate::flags::flag_matching::FeatureFlagMatch;
use crate::flags::flag_models::LocalEvaluationResponse;
use crate::properties::property_matching::FlagMatchingError;

fn definitions(flags: Value) -> FlagDefinitions {
    let response: LocalEvaluationResponse =
        serde_json::from_value(json!({ "flags": flags })).expect("valid definitions");
    FlagDefinitions::from(response)
}

fn person(properties: Value) -> FlagEvaluationOptions {
    FlagEvaluationOptions {
        person_properties: Some(serde_json::from_value(properties).expect("valid properties")),
        ..Default::default()
    }
}

fn get_match(
    definitions: &FlagDefinitions,
    key: &str,
    distinct_id: &str,
    properties: Value,
) -> Result<FeatureFlagMatch, FlagMatchingError> {
    let flag = definitions.get_flag(key).expect("flag exists");
    definitions.evaluate_flag(flag, distinct_id, &person(properties))
}

fn evaluate(
    definitions: &FlagDefinitions,
    key: &str,
    distinct_id: &str,
    properties: Value,
) -> Result<FlagValue, FlagMatchingError> {
    get_match(definitions, key, distinct_id, properties).map(|m| m.get_flag_value())
}

fn depends_on(flag_key: &str, chain: &[&str], expected: Value) -> Value {
    json!({
        "key": flag_key,
        "type": "flag",
        "value": expected,
        "operator": "flag_evaluates_to",
        "dependency_chain": chain,
    })
}

#[test]
fn test_full_rollout_without_properties_is_always_on() {
    let definitions = definitions(json!([
        {"id": 1, "key": "beta", "active": true, "filters": {"groups": [{"rollout_percentage": 100}]}}
    ]));

    for i in 0..100 {
        let distinct_id = format!("user_{i}");
        assert_eq!(
            evaluate(&definitions, "beta", &distinct_id, json!({})),
            Ok(FlagValue::Boolean(true)),
            "{distinct_id} should be in a full rollout"
        );
    }
}

#[test]
fn test_property_condition_without_rollout() {
    let definitions = definitions(json!([
        {
            "id": 1,
            "key": "beta",
            "active": true,
            "filters": {"groups": [{"properties": [{"key": "country", "value": "US", "operator": "exact", "type": "person"}]}]}
        }
    ]));

    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({"country": "US"})),
        Ok(FlagValue::Boolean(true))
    );
    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({"country": "DE"})),
        Ok(FlagValue::Boolean(false))
    );
    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({"plan": "pro"})),
        Err(FlagMatchingError::MissingProperty("country".to_string()))
    );
}

#[test]
fn test_even_variant_split_over_many_identities() {
    let definitions = definitions(json!([
        {
            "id": 1,
            "key": "multivariate-flag",
            "active": true,
            "filters": {
                "groups": [{"rollout_percentage": 100}],
                "multivariate": {"variants": [
                    {"key": "A", "rollout_percentage": 50},
                    {"key": "B", "rollout_percentage": 50}
                ]}
            }
        }
    ]));

    let mut counts: HashMap<FlagValue, usize> = HashMap::new();
    for i in 0..10_000 {
        let value = evaluate(&definitions, "multivariate-flag", &format!("user_{i}"), json!({}))
            .expect("conclusive");
        *counts.entry(value).or_default() += 1;
    }

    let a = counts.get(&FlagValue::from("A")).copied().unwrap_or_default();
    let b = counts.get(&FlagValue::from("B")).copied().unwrap_or_default();
    assert_eq!(a + b, 10_000, "every identity gets a variant: {counts:?}");
    assert!((4_700..=5_300).contains(&a), "A got {a} of 10000");
}

#[test]
fn test_override_groups_are_tried_first() {
    let definitions = definitions(json!([
        {
            "id": 1,
            "key": "beta",
            "active": true,
            "filters": {
                "groups": [
                    {"rollout_percentage": 100},
                    {"properties": [{"key": "email", "value": "@posthog.com", "operator": "icontains"}], "rollout_percentage": 100, "variant": "test"}
                ],
                "multivariate": {"variants": [
                    {"key": "control", "rollout_percentage": 100},
                    {"key": "test", "rollout_percentage": 0}
                ]}
            }
        }
    ]));

    let flag_match = get_match(&definitions, "beta", "user", json!({"email": "me@posthog.com"}))
        .expect("conclusive");
    assert_eq!(flag_match.get_flag_value(), FlagValue::from("test"));
    assert_eq!(flag_match.condition_index, Some(1));
    assert_eq!(flag_match.reason, FeatureFlagMatchReason::ConditionMatch);

    let flag_match = get_match(&definitions, "beta", "user", json!({"email": "me@example.com"}))
        .expect("conclusive");
    assert_eq!(flag_match.get_flag_value(), FlagValue::from("control"));
    assert_eq!(flag_match.condition_index, Some(0));
}

#[test]
fn test_undeclared_variant_override_falls_back_to_hashing() {
    let definitions = definitions(json!([
        {
            "id": 1,
            "key": "beta",
            "active": true,
            "filters": {
                "groups": [{"rollout_percentage": 100, "variant": "retired"}],
                "multivariate": {"variants": [{"key": "control", "rollout_percentage": 100}]}
            }
        }
    ]));

    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({})),
        Ok(FlagValue::from("control"))
    );
}

#[test]
fn test_leftover_variant_mass_yields_plain_true() {
    let definitions = definitions(json!([
        {
            "id": 1,
            "key": "beta",
            "active": true,
            "filters": {
                "groups": [{"rollout_percentage": 100}],
                "multivariate": {"variants": [
                    {"key": "a", "rollout_percentage": 40},
                    {"key": "b", "rollout_percentage": 40}
                ]}
            }
        }
    ]));

    // variant draws: user_0 ~0.2835, user_4 ~0.8603
    assert_eq!(
        evaluate(&definitions, "beta", "user_0", json!({})),
        Ok(FlagValue::from("a"))
    );
    assert_eq!(
        evaluate(&definitions, "beta", "user_4", json!({})),
        Ok(FlagValue::Boolean(true))
    );
}

#[rstest]
#[case(0.0, false)]
#[case(41.0, false)]
#[case(42.0, true)]
#[case(100.0, true)]
fn test_rollout_gate(#[case] rollout: f64, #[case] enabled: bool) {
    // rollout draw for user_0 on "beta" is ~0.4109
    let definitions = definitions(json!([
        {"id": 1, "key": "beta", "active": true, "filters": {"groups": [{"rollout_percentage": rollout}]}}
    ]));

    let flag_match = get_match(&definitions, "beta", "user_0", json!({})).expect("conclusive");
    assert_eq!(flag_match.matches, enabled);
    if !enabled {
        assert_eq!(flag_match.reason, FeatureFlagMatchReason::OutOfRolloutBound);
        assert_eq!(flag_match.condition_index, Some(0));
    }
}

#[test]
fn test_flag_without_groups_is_off() {
    let definitions = definitions(json!([
        {"id": 1, "key": "beta", "active": true, "filters": {"groups": []}}
    ]));
    let flag_match = get_match(&definitions, "beta", "user", json!({})).expect("conclusive");
    assert!(!flag_match.matches);
    assert_eq!(flag_match.reason, FeatureFlagMatchReason::NoConditionMatch);
}

#[test]
fn test_inactive_and_deleted_flags_are_off() {
    let definitions = definitions(json!([
        {"id": 1, "key": "inactive", "active": false, "filters": {"groups": [{"rollout_percentage": 100}]}},
        {"id": 2, "key": "deleted", "active": true, "deleted": true, "filters": {"groups": [{"rollout_percentage": 100}]}}
    ]));

    for key in ["inactive", "deleted"] {
        let flag_match = get_match(&definitions, key, "user", json!({})).expect("conclusive");
        assert!(!flag_match.matches);
        assert_eq!(flag_match.reason, FeatureFlagMatchReason::FlagDisabled);
    }
}

#[test]
fn test_experience_continuity_needs_the_server() {
    let definitions = definitions(json!([
        {"id": 1, "key": "beta", "active": true, "ensure_experience_continuity": true, "filters": {"groups": [{"rollout_percentage": 100}]}}
    ]));
    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({})),
        Err(FlagMatchingError::ExperienceContinuity("beta".to_string()))
    );
}

#[test]
fn test_inconclusive_group_only_matters_without_a_match() {
    let definitions = definitions(json!([
        {
            "id": 1,
            "key": "fallthrough",
            "active": true,
            "filters": {"groups": [
                {"properties": [{"key": "plan", "value": "pro"}]},
                {"rollout_percentage": 100}
            ]}
        },
        {
            "id": 2,
            "key": "undecided",
            "active": true,
            "filters": {"groups": [
                {"properties": [{"key": "plan", "value": "pro"}]},
                {"properties": [{"key": "country", "value": "US"}]}
            ]}
        }
    ]));

    assert_eq!(
        evaluate(&definitions, "fallthrough", "user", json!({})),
        Ok(FlagValue::Boolean(true))
    );
    assert_eq!(
        evaluate(&definitions, "undecided", "user", json!({"country": "DE"})),
        Err(FlagMatchingError::MissingProperty("plan".to_string()))
    );
    assert_eq!(
        evaluate(&definitions, "undecided", "user", json!({"country": "US"})),
        Ok(FlagValue::Boolean(true))
    );
}

#[test]
fn test_condition_properties_must_all_match() {
    let definitions = definitions(json!([
        {
            "id": 1,
            "key": "beta",
            "active": true,
            "filters": {"groups": [{
                "properties": [
                    {"key": "country", "value": ["US", "CA"], "operator": "exact"},
                    {"key": "plan", "value": "free", "operator": "exact", "negation": true},
                    {"key": "age", "value": 18, "operator": "gte"}
                ],
                "rollout_percentage": 100
            }]}
        }
    ]));

    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({"country": "ca", "plan": "pro", "age": 30})),
        Ok(FlagValue::Boolean(true))
    );
    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({"country": "US", "plan": "free", "age": 30})),
        Ok(FlagValue::Boolean(false))
    );
    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({"country": "US", "plan": "pro", "age": "17"})),
        Ok(FlagValue::Boolean(false))
    );
}

#[test]
fn test_cohort_conditions() {
    let response: LocalEvaluationResponse = serde_json::from_value(json!({
        "flags": [{
            "id": 1,
            "key": "beta",
            "active": true,
            "filters": {"groups": [{"properties": [{"key": "id", "value": 98, "type": "cohort"}], "rollout_percentage": 100}]}
        }],
        "cohorts": {
            "98": {"type": "OR", "values": [
                {"type": "AND", "values": [{"key": "email", "value": "@posthog.com", "operator": "icontains", "type": "person"}]}
            ]}
        }
    }))
    .expect("valid definitions");
    let definitions = FlagDefinitions::from(response);

    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({"email": "max@PostHog.com"})),
        Ok(FlagValue::Boolean(true))
    );
    assert_eq!(
        evaluate(&definitions, "beta", "user", json!({"email": "max@example.com"})),
        Ok(FlagValue::Boolean(false))
    );
}

#[test]
fn test_payload_follows_the_resolved_value() {
    let definitions = definitions(json!([
        {
            "id": 1,
            "key": "beta",
            "active": true,
            "filters": {
                "groups": [{"properties": [{"key": "country", "value": "US"}]}],
                "payloads": {"true": {"color": "blue"}, "false": "unused"}
            }
        }
    ]));

    let on = get_match(&definitions, "beta", "user", json!({"country": "US"})).expect("conclusive");
    assert_eq!(on.payload, Some(json!({"color": "blue"})));

    let off = get_match(&definitions, "beta", "user", json!({"country": "DE"})).expect("conclusive");
    assert_eq!(off.payload, None);
}

fn dependency_definitions() -> FlagDefinitions {
    definitions(json!([
        {
            "id": 1,
            "key": "flag-a",
            "active": true,
            "filters": {"groups": [{"properties": [{"key": "country", "value": "US"}], "rollout_percentage": 100}]}
        },
        {
            "id": 2,
            "key": "flag-b",
            "active": true,
            "filters": {"groups": [{"properties": [depends_on("flag-a", &["flag-a"], json!(true))], "rollout_percentage": 100}]}
        },
        {
            "id": 3,
            "key": "flag-c",
            "active": true,
            "filters": {"groups": [{"properties": [depends_on("flag-b", &["flag-a", "flag-b"], json!(true))], "rollout_percentage": 100}]}
        },
        {
            "id": 4,
            "key": "multivariate",
            "active": true,
            "filters": {
                "groups": [{"rollout_percentage": 100}],
                "multivariate": {"variants": [{"key": "control", "rollout_percentage": 100}]}
            }
        },
        {
            "id": 5,
            "key": "wants-control",
            "active": true,
            "filters": {"groups": [{"properties": [depends_on("multivariate", &["multivariate"], json!("control"))]}]}
        },
        {
            "id": 6,
            "key": "wants-test",
            "active": true,
            "filters": {"groups": [{"properties": [depends_on("multivariate", &["multivariate"], json!("test"))]}]}
        },
        {
            "id": 7,
            "key": "switched-off",
            "active": false,
            "filters": {"groups": [{"rollout_percentage": 100}]}
        },
        {
            "id": 8,
            "key": "wants-switched-off",
            "active": true,
            "filters": {"groups": [{"properties": [depends_on("switched-off", &["switched-off"], json!(true))]}]}
        },
        {
            "id": 9,
            "key": "wants-ghost",
            "active": true,
            "filters": {"groups": [{"properties": [depends_on("ghost", &["ghost"], json!(true))]}]}
        },
        {
            "id": 10,
            "key": "cyclic",
            "active": true,
            "filters": {"groups": [{"properties": [depends_on("cyclic", &[], json!(true))]}]}
        },
        {
            "id": 11,
            "key": "ping",
            "active": true,
            "filters": {"groups": [{"properties": [depends_on("pong", &["pong"], json!(true))]}]}
        },
        {
            "id": 12,
            "key": "pong",
            "active": true,
            "filters": {"groups": [{"properties": [depends_on("ping", &["ping"], json!(true))]}]}
        }
    ]))
}

#[test]
fn test_dependency_chains() {
    let definitions = dependency_definitions();

    for key in ["flag-b", "flag-c"] {
        assert_eq!(
            evaluate(&definitions, key, "user", json!({"country": "US"})),
            Ok(FlagValue::Boolean(true)),
            "{key} with a matching root"
        );
        assert_eq!(
            evaluate(&definitions, key, "user", json!({"country": "DE"})),
            Ok(FlagValue::Boolean(false)),
            "{key} with a failing root"
        );
        assert_eq!(
            evaluate(&definitions, key, "user", json!({})),
            Err(FlagMatchingError::DependencyInconclusive("flag-a".to_string())),
            "{key} with an undecidable root"
        );
    }
}

#[test]
fn test_dependency_on_variant_value() {
    let definitions = dependency_definitions();
    assert_eq!(
        evaluate(&definitions, "wants-control", "user", json!({})),
        Ok(FlagValue::Boolean(true))
    );
    assert_eq!(
        evaluate(&definitions, "wants-test", "user", json!({})),
        Ok(FlagValue::Boolean(false))
    );
}

#[test]
fn test_inactive_dependency_settles_to_false() {
    let definitions = dependency_definitions();
    assert_eq!(
        evaluate(&definitions, "wants-switched-off", "user", json!({})),
        Ok(FlagValue::Boolean(false))
    );
}

#[test]
fn test_unknown_dependency_is_inconclusive() {
    let definitions = dependency_definitions();
    assert_eq!(
        evaluate(&definitions, "wants-ghost", "user", json!({})),
        Err(FlagMatchingError::MissingDependency("ghost".to_string()))
    );
}

#[test]
fn test_empty_dependency_chain_is_a_cycle() {
    let definitions = dependency_definitions();
    assert_eq!(
        evaluate(&definitions, "cyclic", "user", json!({})),
        Err(FlagMatchingError::DependencyCycle("cyclic".to_string()))
    );
}

#[test]
fn test_mutual_dependencies_terminate() {
    let definitions = dependency_definitions();
    assert!(evaluate(&definitions, "ping", "user", json!({})).is_err());
    assert!(evaluate(&definitions, "pong", "user", json!({})).is_err());
}

#[test]
fn test_dependencies_are_memoized_per_evaluation() {
    let definitions = dependency_definitions();
    let flag = definitions.get_flag("flag-c").expect("flag exists");
    let properties = HashMap::from([("country".to_string(), json!("US"))]);
    let mut dependency_cache = DependencyCache::new();

    let value = definitions
        .matcher()
        .match_feature_flag_properties(flag, "user", &properties, &mut dependency_cache)
        .expect("conclusive");

    assert_eq!(value, FlagValue::Boolean(true));
    assert_eq!(
        dependency_cache.get("flag-a"),
        Some(&DependencyResult::Settled(FlagValue::Boolean(true)))
    );
    assert_eq!(
        dependency_cache.get("flag-b"),
        Some(&DependencyResult::Settled(FlagValue::Boolean(true)))
    );
    assert_eq!(dependency_cache.len(), 2);
}

#[test]
fn test_previously_inconclusive_dependency_is_not_retried() {
    let definitions = dependency_definitions();
    let flag = definitions.get_flag("flag-b").expect("flag exists");
    let properties = HashMap::from([("country".to_string(), json!("US"))]);
    let mut dependency_cache = DependencyCache::new();
    dependency_cache.insert("flag-a", DependencyResult::Inconclusive);

    assert_eq!(
        definitions.matcher().match_feature_flag_properties(
            flag,
            "user",
            &properties,
            &mut dependency_cache
        ),
        Err(FlagMatchingError::DependencyInconclusive("flag-a".to_string()))
    );
}
