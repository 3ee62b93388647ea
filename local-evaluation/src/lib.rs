pub mod api;
pub mod cache;
pub mod cohorts;
pub mod config;
pub mod flags;
pub mod metrics_consts;
pub mod poller;
pub mod properties;
pub mod utils;
