use targeting_core::{TargetingResult, VisitorInfo, DEVICE_PROVIDER};

use crate::condition::{nested_str, string_list, usable_device_payload, Condition, ConditionConfig};

/// Matches the browser (client) name reported by the device provider.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Browser {
    browsers: Vec<String>,
}

impl Browser {
    pub const KIND: &'static str = "browser";
    pub const VARIABLE: &'static str = "browser";

    pub fn new<I, S>(browsers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            browsers: browsers
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &ConditionConfig) -> TargetingResult<Self> {
        Ok(Self {
            browsers: string_list(config, "browser")?,
        })
    }
}

impl Condition for Browser {
    fn data_provider_keys(&self) -> &'static [&'static str] {
        &[DEVICE_PROVIDER]
    }

    fn can_match(&self) -> bool {
        !self.browsers.is_empty()
    }

    fn matches(&self, visitor: &mut VisitorInfo) -> bool {
        let Some(name) =
            usable_device_payload(visitor).and_then(|p| nested_str(p, "client", "name"))
        else {
            return false;
        };
        if !self.browsers.contains(&name) {
            return false;
        }
        visitor.record_variable(Self::VARIABLE, name);
        true
    }
}
