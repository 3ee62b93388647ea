use sha1::{Digest, Sha1};

use crate::flags::flag_models::FeatureFlag;

const LONG_SCALE: u64 = 0xfffffffffffffff;

pub const ROLLOUT_SALT: &str = "";
pub const VARIANT_SALT: &str = "variant";

/// Calculates a deterministic hash value between 0 and 1 for a given flag, identifier and salt.
///
/// This function uses SHA1 to generate a hash of `"{flag_key}.{distinct_id}{salt}"`, then converts
/// the first 15 hex characters of the digest to a number between 0 and 1. The remote evaluation
/// service does exactly the same, so changing any step here moves users between rollout buckets.
///
/// ## Arguments
/// * `flag_key` - The key of the flag being evaluated
/// * `distinct_id` - The identifier to hash (a person's distinct id or a group key)
/// * `salt` - `""` for rollout gating, `"variant"` for variant selection
///
/// ## Returns
/// * `f64` - A number in `[0, 1)`
pub fn calculate_hash(flag_key: &str, distinct_id: &str, salt: &str) -> f64 {
    let hash_key = format!("{flag_key}.{distinct_id}{salt}");
    let digest = Sha1::digest(hash_key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    // The first 8 bytes shifted right by 4 bits are exactly the first 15 hex characters.
    let hash_val = u64::from_be_bytes(prefix) >> 4;
    hash_val as f64 / LONG_SCALE as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantLookupEntry {
    pub value_min: f64,
    pub value_max: f64,
    pub key: String,
}

/// Cumulative `[min, max)` intervals over the declared variants, in declared order.
pub fn variant_lookup_table(flag: &FeatureFlag) -> Vec<VariantLookupEntry> {
    let mut value_min = 0.0;
    flag.get_variants()
        .into_iter()
        .map(|variant| {
            let value_max = value_min + variant.rollout_percentage / 100.0;
            let entry = VariantLookupEntry {
                value_min,
                value_max,
                key: variant.key,
            };
            value_min = value_max;
            entry
        })
        .collect()
}

/// Picks the variant whose interval holds this identity's variant draw, if any.
pub fn get_matching_variant(flag: &FeatureFlag, distinct_id: &str) -> Option<String> {
    let hash = calculate_hash(&flag.key, distinct_id, VARIANT_SALT);
    variant_lookup_table(flag)
        .into_iter()
        .find(|entry| hash >= entry.value_min && hash < entry.value_max)
        .map(|entry| entry.key)
}

/// The rollout gate: passes when there is no rollout or the draw lands strictly below it.
pub fn is_in_rollout(flag_key: &str, distinct_id: &str, rollout_percentage: Option<f64>) -> bool {
    match rollout_percentage {
        None => true,
        Some(percentage) => {
            calculate_hash(flag_key, distinct_id, ROLLOUT_SALT) < percentage / 100.0
        }
    }
}
