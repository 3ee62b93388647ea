use envconfig::Envconfig;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "https://us.i.posthog.com")]
    pub host: String,

    #[envconfig(default = "")]
    pub project_api_key: String,

    // Only needed to download flag definitions for local evaluation.
    #[envconfig(default = "")]
    pub personal_api_key: String,

    #[envconfig(default = "false")]
    pub local_evaluation: FlexBool,

    #[envconfig(default = "30")]
    pub poll_interval_seconds: u64,

    #[envconfig(default = "1000")]
    pub feature_flag_cache_size: usize,

    #[envconfig(default = "300000")]
    pub feature_flag_cache_max_age_ms: u64,

    #[envconfig(default = "10000")]
    pub request_timeout_ms: u64,

    #[envconfig(default = "false")]
    pub debug: FlexBool,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            host: "http://localhost:8010".to_string(),
            project_api_key: "phc_test_project_key".to_string(),
            personal_api_key: "phx_test_personal_key".to_string(),
            local_evaluation: FlexBool(true),
            poll_interval_seconds: 30,
            feature_flag_cache_size: 100,
            feature_flag_cache_max_age_ms: 60_000,
            request_timeout_ms: 1000,
            debug: FlexBool(false),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Local evaluation needs both the switch and a key to download definitions with.
    pub fn local_evaluation_enabled(&self) -> bool {
        *self.local_evaluation && !self.personal_api_key.is_empty()
    }
}
