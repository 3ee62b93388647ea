use std::cmp::Ordering;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FeatureFlagMatchReason {
    ConditionMatch,
    NoConditionMatch,
    OutOfRolloutBound,
    NoGroupType,
    FlagDisabled,
}

impl FeatureFlagMatchReason {
    pub fn score(&self) -> i32 {
        match self {
            FeatureFlagMatchReason::ConditionMatch => 3,
            FeatureFlagMatchReason::NoGroupType => 2,
            FeatureFlagMatchReason::OutOfRolloutBound => 1,
            FeatureFlagMatchReason::NoConditionMatch => 0,
            FeatureFlagMatchReason::FlagDisabled => 0,
        }
    }

    pub fn describe(&self, condition_index: Option<usize>) -> String {
        match (self, condition_index) {
            (FeatureFlagMatchReason::ConditionMatch, Some(index)) => {
                format!("Matched condition set {}", index + 1)
            }
            (FeatureFlagMatchReason::OutOfRolloutBound, Some(index)) => {
                format!("Out of rollout bound for condition set {}", index + 1)
            }
            (FeatureFlagMatchReason::ConditionMatch, None) => "Matched conditions".to_string(),
            (FeatureFlagMatchReason::OutOfRolloutBound, None) => {
                "Out of rollout bound".to_string()
            }
            (FeatureFlagMatchReason::NoConditionMatch, _) => "No matching condition set".to_string(),
            (FeatureFlagMatchReason::NoGroupType, _) => {
                "Group type was not provided for this group flag".to_string()
            }
            (FeatureFlagMatchReason::FlagDisabled, _) => "Flag is disabled".to_string(),
        }
    }
}

impl PartialOrd for FeatureFlagMatchReason {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeatureFlagMatchReason {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score().cmp(&other.score())
    }
}
