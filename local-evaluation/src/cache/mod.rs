pub mod flags_cache;
