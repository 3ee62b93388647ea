use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::Parser;
use envconfig::Envconfig;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use local_evaluation::api::types::FlagEvaluationOptions;
use local_evaluation::config::Config;
use local_evaluation::flags::flag_service::FlagService;

/// Evaluate feature flags for one identity. Connection settings come from the environment.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// The distinct id to evaluate flags for
    distinct_id: String,

    /// Only evaluate this flag
    #[arg(long)]
    flag: Option<String>,

    /// Person property as key=value; values are read as JSON when they parse as JSON
    #[arg(long = "person-property", value_parser = parse_key_value)]
    person_properties: Vec<(String, String)>,

    /// Group as type=key
    #[arg(long = "group", value_parser = parse_key_value)]
    groups: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

impl Cli {
    fn evaluation_options(&self) -> FlagEvaluationOptions {
        let mut options = FlagEvaluationOptions::new();
        for (key, value) in &self.person_properties {
            let value = serde_json::from_str::<Value>(value)
                .unwrap_or_else(|_| Value::String(value.clone()));
            options = options.with_person_property(key.clone(), value);
        }
        for (group_type, group_key) in &self.groups {
            options = options.with_group(group_type.clone(), group_key.clone());
        }
        options
    }
}

fn init_logging(debug: bool) {
    let base_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    let log_layer = if debug {
        base_layer
            .with_ansi(true)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        base_layer
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::init_from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(*config.debug);

    let service = match FlagService::from_config(&config) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Failed to set up flag service: {e}");
            return ExitCode::FAILURE;
        }
    };

    if config.local_evaluation_enabled() {
        if let Err(e) = service.load_feature_flag_definitions().await {
            warn!("Falling back to remote evaluation: {}", e);
        }
    }

    let options = cli.evaluation_options();
    let output = match &cli.flag {
        Some(key) => {
            let flag = service
                .resolve_feature_flag(&cli.distinct_id, key, &options)
                .await;
            serde_json::to_string_pretty(&flag)
        }
        None => {
            let flags: BTreeMap<_, _> = service
                .resolve_all_flags(&cli.distinct_id, &options)
                .await
                .into_iter()
                .collect();
            serde_json::to_string_pretty(&flags)
        }
    };

    service.shutdown().await;

    match output {
        Ok(json) => {
            println!("{json}");
            info!("Evaluated flags for {}", cli.distinct_id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize flags: {e}");
            ExitCode::FAILURE
        }
    }
}
