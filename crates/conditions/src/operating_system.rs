use targeting_core::{TargetingResult, VisitorInfo, DEVICE_PROVIDER};

use crate::condition::{nested_str, string_list, usable_device_payload, Condition, ConditionConfig};

/// Matches the operating system family reported by the device provider.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperatingSystem {
    systems: Vec<String>,
}

impl OperatingSystem {
    pub const KIND: &'static str = "operating_system";
    pub const VARIABLE: &'static str = "os";

    pub fn new<I, S>(systems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            systems: systems
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &ConditionConfig) -> TargetingResult<Self> {
        Ok(Self {
            systems: string_list(config, "os")?,
        })
    }
}

impl Condition for OperatingSystem {
    fn data_provider_keys(&self) -> &'static [&'static str] {
        &[DEVICE_PROVIDER]
    }

    fn can_match(&self) -> bool {
        !self.systems.is_empty()
    }

    fn matches(&self, visitor: &mut VisitorInfo) -> bool {
        let Some(os) = usable_device_payload(visitor).and_then(|p| nested_str(p, "os", "name"))
        else {
            return false;
        };
        if !self.systems.contains(&os) {
            return false;
        }
        visitor.record_variable(Self::VARIABLE, os);
        true
    }
}
