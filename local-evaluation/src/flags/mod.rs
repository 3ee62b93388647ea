pub mod flag_definitions;
pub mod flag_dependencies;
pub mod flag_match_reason;
pub mod flag_matching;
pub mod flag_matching_utils;
pub mod flag_models;
pub mod flag_service;

#[cfg(test)]
mod test_flag_matching;
