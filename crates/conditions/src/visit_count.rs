//! Behavioral condition on the number of visits the caller has counted
//! for this visitor.

use serde_json::Value;
use targeting_core::{
    TargetingError, TargetingResult, VisitorInfo, BEHAVIOR_PROVIDER, DEVICE_PROVIDER,
};

use crate::condition::{optional_u64, usable_device_payload, Condition, ConditionConfig};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisitCount {
    min: Option<u64>,
    max: Option<u64>,
}

impl VisitCount {
    pub const KIND: &'static str = "visit_count";
    pub const VARIABLE: &'static str = "visit_count";

    pub fn between(min: Option<u64>, max: Option<u64>) -> Self {
        Self { min, max }
    }

    pub fn from_config(config: &ConditionConfig) -> TargetingResult<Self> {
        let min = optional_u64(config, "min")?;
        let max = optional_u64(config, "max")?;
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(TargetingError::InvalidCondition(format!(
                    "visit_count min ({lo}) is greater than max ({hi})"
                )));
            }
        }
        Ok(Self { min, max })
    }
}

impl Condition for VisitCount {
    fn data_provider_keys(&self) -> &'static [&'static str] {
        &[DEVICE_PROVIDER, BEHAVIOR_PROVIDER]
    }

    fn can_match(&self) -> bool {
        match (self.min, self.max) {
            (None, None) => false,
            (Some(lo), Some(hi)) => lo <= hi,
            _ => true,
        }
    }

    fn matches(&self, visitor: &mut VisitorInfo) -> bool {
        // The device payload carries the bot flag; without it the visit is unclassified.
        if usable_device_payload(visitor).is_none() {
            return false;
        }
        let Some(count) = visitor
            .provider_data(BEHAVIOR_PROVIDER)
            .and_then(|payload| payload.get("visit_count"))
            .and_then(Value::as_u64)
        else {
            return false;
        };

        let above_min = self.min.map_or(true, |lo| count >= lo);
        let below_max = self.max.map_or(true, |hi| count <= hi);
        if !(above_min && below_max) {
            return false;
        }
        visitor.record_variable(Self::VARIABLE, count);
        true
    }
}
