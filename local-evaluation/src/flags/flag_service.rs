use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::client::{FlagsApiClient, HttpFlagsApiClient};
use crate::api::errors::{FlagError, ERRORS_WHILE_COMPUTING_FLAGS, FLAG_MISSING};
use crate::api::types::{
    FlagEvaluationOptions, FlagMetadata, FlagValue, RemoteFlagsRequest, ResolvedFlag,
};
use crate::cache::flags_cache::{CachedFlags, FeatureFlagCache, FeatureFlagCacheKey};
use crate::config::Config;
use crate::flags::flag_definitions::{FlagDefinitions, FlagDefinitionsStore};
use crate::flags::flag_matching::FeatureFlagMatch;
use crate::flags::flag_models::FeatureFlag;
use crate::metrics_consts::{
    DEFINITIONS_FLAGS_GAUGE, DEFINITIONS_LOADS_COUNTER, FLAG_CACHE_HIT_COUNTER,
    FLAG_CACHE_MISS_COUNTER, LOCAL_EVALUATION_COUNTER, REMOTE_FLAGS_REQUESTS_COUNTER,
};
use crate::poller::LocalEvaluationPoller;
use crate::utils::clock::{Clock, SystemClock};

/// Fetches definitions and swaps them into the store, one fetch at a time.
struct DefinitionsLoader {
    client: Arc<dyn FlagsApiClient>,
    store: FlagDefinitionsStore,
    load_guard: tokio::sync::Mutex<()>,
    completed_loads: AtomicU64,
    first_use_load_attempted: AtomicBool,
}

impl DefinitionsLoader {
    /// Loads definitions the first time a flag check finds none. Only one
    /// attempt is made; later refreshes belong to the poller or the caller.
    async fn load_on_first_use(&self) {
        if self.store.load().is_some()
            || self.first_use_load_attempted.swap(true, Ordering::SeqCst)
        {
            return;
        }
        if let Err(e) = self.load().await {
            debug!("Flag definitions unavailable on first use: {}", e);
        }
    }

    async fn load(&self) -> Result<(), FlagError> {
        let seen = self.completed_loads.load(Ordering::SeqCst);
        let _guard = self.load_guard.lock().await;
        if self.completed_loads.load(Ordering::SeqCst) != seen {
            debug!("Flag definitions were refreshed while waiting, skipping fetch");
            return Ok(());
        }

        match self.client.fetch_local_evaluation_definitions().await {
            Ok(response) => {
                let definitions = FlagDefinitions::from(response);
                metrics::gauge!(DEFINITIONS_FLAGS_GAUGE).set(definitions.flags_by_key.len() as f64);
                info!(
                    "Loaded {} flag definitions and {} cohorts",
                    definitions.flags_by_key.len(),
                    definitions.cohorts.len()
                );
                self.store.replace(definitions);
                self.completed_loads.fetch_add(1, Ordering::SeqCst);
                metrics::counter!(DEFINITIONS_LOADS_COUNTER, "outcome" => "success").increment(1);
                Ok(())
            }
            Err(e) => {
                // the previous snapshot, if any, stays in place
                warn!("Failed to load flag definitions: {}", e);
                metrics::counter!(DEFINITIONS_LOADS_COUNTER, "outcome" => e.reason_code())
                    .increment(1);
                Err(e)
            }
        }
    }
}

/// Entry point for flag checks: result cache, then local evaluation, then the
/// remote flags endpoint for whatever local evaluation could not decide.
///
/// None of the flag-check methods fail. Anything that can't be determined
/// comes back as the caller's default.
pub struct FlagService {
    project_api_key: String,
    local_evaluation: bool,
    client: Arc<dyn FlagsApiClient>,
    cache: FeatureFlagCache,
    loader: Arc<DefinitionsLoader>,
    poller: LocalEvaluationPoller,
    clock: Arc<dyn Clock>,
}

impl FlagService {
    pub fn new(config: &Config, client: Arc<dyn FlagsApiClient>, clock: Arc<dyn Clock>) -> Self {
        let loader = Arc::new(DefinitionsLoader {
            client: client.clone(),
            store: FlagDefinitionsStore::new(),
            load_guard: tokio::sync::Mutex::new(()),
            completed_loads: AtomicU64::new(0),
            first_use_load_attempted: AtomicBool::new(false),
        });

        FlagService {
            project_api_key: config.project_api_key.clone(),
            local_evaluation: config.local_evaluation_enabled(),
            client,
            cache: FeatureFlagCache::new(
                config.feature_flag_cache_size,
                config.feature_flag_cache_max_age_ms,
                clock.clone(),
            ),
            loader,
            poller: LocalEvaluationPoller::new(config.poll_interval()),
            clock,
        }
    }

    /// A service talking to `config.host` over HTTP.
    pub fn from_config(config: &Config) -> Result<Self, FlagError> {
        let client = HttpFlagsApiClient::new(config)?;
        Ok(Self::new(config, Arc::new(client), Arc::new(SystemClock)))
    }

    pub fn cache(&self) -> &FeatureFlagCache {
        &self.cache
    }

    pub fn definitions(&self) -> Result<Arc<FlagDefinitions>, FlagError> {
        self.loader.store.load().ok_or(FlagError::DefinitionsNotLoaded)
    }

    /// Fetches a fresh definitions snapshot now. Concurrent callers share one fetch.
    pub async fn load_feature_flag_definitions(&self) -> Result<(), FlagError> {
        self.loader.load().await
    }

    /// Starts the background definitions refresh. Returns `false` when local
    /// evaluation is disabled or the poller is already running.
    pub fn start_polling(&self) -> bool {
        if !self.local_evaluation {
            debug!("Local evaluation is disabled, not polling for flag definitions");
            return false;
        }
        let loader = self.loader.clone();
        self.poller.start(move || {
            let loader = loader.clone();
            async move { loader.load().await }
        })
    }

    pub async fn shutdown(&self) {
        self.poller.stop().await;
    }

    /// Drops every cached remote result. Definitions are left alone.
    pub fn clear(&self) {
        self.cache.clear();
        debug!("Feature flags cache cleared");
    }

    pub async fn is_feature_enabled(
        &self,
        distinct_id: &str,
        key: &str,
        options: &FlagEvaluationOptions,
        default: bool,
    ) -> bool {
        match self.resolve_feature_flag(distinct_id, key, options).await {
            Some(flag) => flag.value().is_truthy(),
            None => default,
        }
    }

    pub async fn get_feature_flag(
        &self,
        distinct_id: &str,
        key: &str,
        options: &FlagEvaluationOptions,
        default: FlagValue,
    ) -> FlagValue {
        match self.resolve_feature_flag(distinct_id, key, options).await {
            Some(flag) => flag.value(),
            None => default,
        }
    }

    pub async fn get_feature_flag_payload(
        &self,
        distinct_id: &str,
        key: &str,
        options: &FlagEvaluationOptions,
        default: Value,
    ) -> Value {
        self.resolve_feature_flag(distinct_id, key, options)
            .await
            .and_then(|flag| flag.metadata.payload)
            .unwrap_or(default)
    }

    pub async fn resolve_feature_flag(
        &self,
        distinct_id: &str,
        key: &str,
        options: &FlagEvaluationOptions,
    ) -> Option<ResolvedFlag> {
        let mut flags = self.resolve_flags(distinct_id, options, Some(key)).await;
        let flag = flags.remove(key);
        if flag.is_none() {
            debug!("{}: no value for flag {} and {}", FLAG_MISSING, key, distinct_id);
        }
        flag
    }

    pub async fn resolve_all_flags(
        &self,
        distinct_id: &str,
        options: &FlagEvaluationOptions,
    ) -> HashMap<String, ResolvedFlag> {
        self.resolve_flags(distinct_id, options, None).await
    }

    async fn resolve_flags(
        &self,
        distinct_id: &str,
        options: &FlagEvaluationOptions,
        only_key: Option<&str>,
    ) -> HashMap<String, ResolvedFlag> {
        let cache_key = FeatureFlagCacheKey::new(distinct_id, options);
        if let Some(cached) = self.cache.get(&cache_key) {
            // a single-flag check only uses the entry if it knows that flag
            let covers_request = match only_key {
                Some(key) => cached.contains_key(key),
                None => true,
            };
            if covers_request {
                metrics::counter!(FLAG_CACHE_HIT_COUNTER).increment(1);
                return cached;
            }
        }
        metrics::counter!(FLAG_CACHE_MISS_COUNTER).increment(1);

        let (local, unresolved) = if self.local_evaluation {
            self.loader.load_on_first_use().await;
            self.evaluate_locally(distinct_id, options, only_key)
        } else {
            (HashMap::new(), true)
        };

        if !unresolved {
            return local;
        }

        self.resolve_remotely(cache_key, distinct_id, options, local)
            .await
    }

    /// Conclusive local results, plus whether anything is left for the remote call.
    fn evaluate_locally(
        &self,
        distinct_id: &str,
        options: &FlagEvaluationOptions,
        only_key: Option<&str>,
    ) -> (HashMap<String, ResolvedFlag>, bool) {
        let definitions = match self.definitions() {
            Ok(definitions) => definitions,
            Err(e) => {
                debug!("Skipping local evaluation: {}", e);
                return (HashMap::new(), true);
            }
        };

        let flags: Vec<&FeatureFlag> = match only_key {
            Some(key) => match definitions.get_flag(key) {
                Some(flag) => vec![flag],
                None => {
                    debug!("Flag {} is not in the local definitions", key);
                    return (HashMap::new(), true);
                }
            },
            None => definitions.flags_by_key.values().collect(),
        };

        let mut resolved = HashMap::with_capacity(flags.len());
        let mut unresolved = false;
        for flag in flags {
            match definitions.evaluate_flag(flag, distinct_id, options) {
                Ok(flag_match) => {
                    let outcome = if flag_match.matches { "match" } else { "no_match" };
                    metrics::counter!(LOCAL_EVALUATION_COUNTER, "outcome" => outcome).increment(1);
                    resolved.insert(flag.key.clone(), resolved_flag(flag, &flag_match));
                }
                Err(e) => {
                    metrics::counter!(LOCAL_EVALUATION_COUNTER, "outcome" => "inconclusive")
                        .increment(1);
                    debug!("Can't evaluate flag {} locally: {}", flag.key, e);
                    unresolved = true;
                }
            }
        }
        (resolved, unresolved)
    }

    async fn resolve_remotely(
        &self,
        cache_key: FeatureFlagCacheKey,
        distinct_id: &str,
        options: &FlagEvaluationOptions,
        local: HashMap<String, ResolvedFlag>,
    ) -> HashMap<String, ResolvedFlag> {
        let request = RemoteFlagsRequest::new(&self.project_api_key, distinct_id, options);

        match self.client.fetch_remote_flags(&request).await {
            Ok(response) => {
                metrics::counter!(REMOTE_FLAGS_REQUESTS_COUNTER, "outcome" => "success")
                    .increment(1);
                let mut merged = response.flags;
                merged.extend(local);

                self.cache.put_entry(
                    cache_key,
                    CachedFlags {
                        flags: Some(merged.clone()),
                        request_id: response.request_id,
                        evaluated_at: Some(self.clock.now_millis()),
                        error: response
                            .errors_while_computing_flags
                            .then(|| ERRORS_WHILE_COMPUTING_FLAGS.to_string()),
                    },
                );
                merged
            }
            Err(e) => {
                let reason = e.reason_code();
                warn!("Failed to fetch flags for {}: {}", distinct_id, e);
                metrics::counter!(REMOTE_FLAGS_REQUESTS_COUNTER, "outcome" => reason.clone())
                    .increment(1);
                self.cache.put_entry(
                    cache_key,
                    CachedFlags {
                        flags: None,
                        request_id: None,
                        evaluated_at: None,
                        error: Some(reason),
                    },
                );
                local
            }
        }
    }
}

fn resolved_flag(flag: &FeatureFlag, flag_match: &FeatureFlagMatch) -> ResolvedFlag {
    ResolvedFlag {
        key: flag.key.clone(),
        enabled: flag_match.matches,
        variant: flag_match.variant.clone(),
        metadata: FlagMetadata {
            id: flag.id,
            version: flag.version.unwrap_or_default(),
            payload: flag_match.payload.clone(),
        },
        reason: Some(flag_match.evaluation_reason()),
    }
}
