#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use local_evaluation::api::client::FlagsApiClient;
use local_evaluation::api::errors::FlagError;
use local_evaluation::api::types::{
    FlagMetadata, RemoteFlagsRequest, RemoteFlagsResponse, ResolvedFlag,
};
use local_evaluation::config::Config;
use local_evaluation::flags::flag_models::LocalEvaluationResponse;
use local_evaluation::flags::flag_service::FlagService;
use local_evaluation::utils::clock::ManualClock;

pub const START_MILLIS: u64 = 1_700_000_000_000;

/// In-memory flags service. Remote failures are consumed in order before any
/// successful response is served.
#[derive(Default)]
pub struct MockFlagsApiClient {
    definitions: Mutex<Option<LocalEvaluationResponse>>,
    definitions_delay: Mutex<Duration>,
    remote_flags: Mutex<HashMap<String, ResolvedFlag>>,
    remote_failures: Mutex<VecDeque<FlagError>>,
    errors_while_computing_flags: Mutex<bool>,
    requests: Mutex<Vec<RemoteFlagsRequest>>,
    pub definitions_calls: AtomicUsize,
    pub remote_calls: AtomicUsize,
}

impl MockFlagsApiClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_definitions(&self, definitions: Value) {
        let response: LocalEvaluationResponse =
            serde_json::from_value(definitions).expect("valid definitions");
        *self.definitions.lock() = Some(response);
    }

    pub fn fail_definitions(&self) {
        *self.definitions.lock() = None;
    }

    pub fn set_definitions_delay(&self, delay: Duration) {
        *self.definitions_delay.lock() = delay;
    }

    pub fn set_remote_flag(&self, key: &str, enabled: bool, variant: Option<&str>) {
        self.remote_flags.lock().insert(
            key.to_string(),
            remote_flag(key, enabled, variant, None),
        );
    }

    pub fn set_remote_flag_with_payload(&self, key: &str, payload: Value) {
        self.remote_flags
            .lock()
            .insert(key.to_string(), remote_flag(key, true, None, Some(payload)));
    }

    pub fn push_remote_failure(&self, error: FlagError) {
        self.remote_failures.lock().push_back(error);
    }

    pub fn set_errors_while_computing_flags(&self, errored: bool) {
        *self.errors_while_computing_flags.lock() = errored;
    }

    pub fn definitions_calls(&self) -> usize {
        self.definitions_calls.load(Ordering::SeqCst)
    }

    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<RemoteFlagsRequest> {
        self.requests.lock().last().cloned()
    }
}

pub fn remote_flag(
    key: &str,
    enabled: bool,
    variant: Option<&str>,
    payload: Option<Value>,
) -> ResolvedFlag {
    ResolvedFlag {
        key: key.to_string(),
        enabled,
        variant: variant.map(str::to_string),
        metadata: FlagMetadata {
            id: 1,
            version: 1,
            payload,
        },
        reason: None,
    }
}

#[async_trait]
impl FlagsApiClient for MockFlagsApiClient {
    async fn fetch_local_evaluation_definitions(
        &self,
    ) -> Result<LocalEvaluationResponse, FlagError> {
        self.definitions_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.definitions_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.definitions
            .lock()
            .clone()
            .ok_or(FlagError::ApiError(500))
    }

    async fn fetch_remote_flags(
        &self,
        request: &RemoteFlagsRequest,
    ) -> Result<RemoteFlagsResponse, FlagError> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(error) = self.remote_failures.lock().pop_front() {
            return Err(error);
        }

        Ok(RemoteFlagsResponse {
            flags: self.remote_flags.lock().clone(),
            request_id: Some(format!("request-{}", self.remote_calls())),
            errors_while_computing_flags: *self.errors_while_computing_flags.lock(),
            quota_limited: None,
        })
    }
}

pub struct TestService {
    pub service: FlagService,
    pub client: Arc<MockFlagsApiClient>,
    pub clock: ManualClock,
}

pub fn test_service(config: Config) -> TestService {
    let client = MockFlagsApiClient::new();
    let clock = ManualClock::new(START_MILLIS);
    let service = FlagService::new(&config, client.clone(), Arc::new(clock.clone()));
    TestService {
        service,
        client,
        clock,
    }
}

/// A project with a full-rollout flag, a country-gated flag and a multivariate flag.
pub fn standard_definitions() -> Value {
    json!({
        "flags": [
            {
                "id": 1,
                "key": "beta",
                "active": true,
                "version": 2,
                "filters": {
                    "groups": [{"rollout_percentage": 100}],
                    "payloads": {"true": {"banner": "Try the beta"}}
                }
            },
            {
                "id": 2,
                "key": "us-only",
                "active": true,
                "filters": {"groups": [{"properties": [{"key": "country", "value": "US", "type": "person"}]}]}
            },
            {
                "id": 3,
                "key": "experiment",
                "active": true,
                "filters": {
                    "groups": [{"rollout_percentage": 100}],
                    "multivariate": {"variants": [{"key": "test", "rollout_percentage": 100}]},
                    "payloads": {"test": "{\"discount\": 10}"}
                }
            }
        ],
        "group_type_mapping": {"0": "company"},
        "cohorts": {}
    })
}
