//! Hardware platform condition: matches the device type reported by the
//! device provider (`desktop`, `mobile`, `tablet`, ...).

use targeting_core::{TargetingResult, VisitorInfo, DEVICE_PROVIDER};

use crate::condition::{nested_str, optional_string, usable_device_payload, Condition, ConditionConfig};

/// Platform value that accepts any concrete device type.
pub const ALL_PLATFORMS: &str = "all";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HardwarePlatform {
    platform: Option<String>,
}

impl HardwarePlatform {
    pub const KIND: &'static str = "hardware_platform";
    /// Name of the variable recorded on a match.
    pub const VARIABLE: &'static str = "platform";

    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: Some(platform.into().trim().to_ascii_lowercase()),
        }
    }

    pub fn from_config(config: &ConditionConfig) -> TargetingResult<Self> {
        Ok(Self {
            platform: optional_string(config, "platform")?,
        })
    }

    fn wanted(&self) -> Option<&str> {
        self.platform.as_deref().filter(|p| !p.is_empty())
    }
}

impl Condition for HardwarePlatform {
    fn data_provider_keys(&self) -> &'static [&'static str] {
        &[DEVICE_PROVIDER]
    }

    fn can_match(&self) -> bool {
        self.wanted().is_some()
    }

    fn matches(&self, visitor: &mut VisitorInfo) -> bool {
        let Some(wanted) = self.wanted() else {
            return false;
        };
        let Some(actual) = usable_device_payload(visitor)
            .and_then(|payload| nested_str(payload, "device", "type"))
        else {
            return false;
        };

        if wanted != ALL_PLATFORMS && wanted != actual {
            return false;
        }
        visitor.record_variable(Self::VARIABLE, actual);
        true
    }
}
