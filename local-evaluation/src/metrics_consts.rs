// Result cache
pub const FLAG_CACHE_HIT_COUNTER: &str = "local_evaluation_flag_cache_hit_total";
pub const FLAG_CACHE_MISS_COUNTER: &str = "local_evaluation_flag_cache_miss_total";

// Evaluation, labelled by outcome: match, no_match, inconclusive
pub const LOCAL_EVALUATION_COUNTER: &str = "local_evaluation_flags_evaluated_total";

// Remote fallback, labelled by outcome: success or the failure reason code
pub const REMOTE_FLAGS_REQUESTS_COUNTER: &str = "local_evaluation_remote_flags_requests_total";

// Definitions refresh, labelled by outcome
pub const DEFINITIONS_LOADS_COUNTER: &str = "local_evaluation_definitions_loads_total";
pub const DEFINITIONS_FLAGS_GAUGE: &str = "local_evaluation_definitions_flags";
