//! Condition contract and the set of shipped condition kinds.

use serde_json::{Map, Value};
use targeting_core::{TargetingError, TargetingResult, VisitorInfo, DEVICE_PROVIDER};

use crate::browser::Browser;
use crate::hardware_platform::HardwarePlatform;
use crate::operating_system::OperatingSystem;
use crate::visit_count::VisitCount;

/// Declarative condition configuration, e.g. `{"platform": "mobile"}`.
pub type ConditionConfig = Map<String, Value>;

/// Capability set every condition kind implements.
///
/// `matches` may only record matched variables on the visitor; it never
/// touches storage. Missing or unusable provider data is a non-match.
pub trait Condition {
    /// Provider keys that must be resolved before `matches` is called.
    fn data_provider_keys(&self) -> &'static [&'static str];

    /// Static gate on the configuration. When false the condition is
    /// treated as non-matching without calling `matches`.
    fn can_match(&self) -> bool;

    fn matches(&self, visitor: &mut VisitorInfo) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetingCondition {
    HardwarePlatform(HardwarePlatform),
    OperatingSystem(OperatingSystem),
    Browser(Browser),
    VisitCount(VisitCount),
}

impl TargetingCondition {
    /// Build a condition from its type tag and configuration.
    pub fn from_config(kind: &str, config: &ConditionConfig) -> TargetingResult<Self> {
        match kind {
            HardwarePlatform::KIND => HardwarePlatform::from_config(config).map(Self::HardwarePlatform),
            OperatingSystem::KIND => OperatingSystem::from_config(config).map(Self::OperatingSystem),
            Browser::KIND => Browser::from_config(config).map(Self::Browser),
            VisitCount::KIND => VisitCount::from_config(config).map(Self::VisitCount),
            other => Err(TargetingError::UnknownCondition(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::HardwarePlatform(_) => HardwarePlatform::KIND,
            Self::OperatingSystem(_) => OperatingSystem::KIND,
            Self::Browser(_) => Browser::KIND,
            Self::VisitCount(_) => VisitCount::KIND,
        }
    }

    fn inner(&self) -> &dyn Condition {
        match self {
            Self::HardwarePlatform(c) => c,
            Self::OperatingSystem(c) => c,
            Self::Browser(c) => c,
            Self::VisitCount(c) => c,
        }
    }
}

impl Condition for TargetingCondition {
    fn data_provider_keys(&self) -> &'static [&'static str] {
        self.inner().data_provider_keys()
    }

    fn can_match(&self) -> bool {
        self.inner().can_match()
    }

    fn matches(&self, visitor: &mut VisitorInfo) -> bool {
        self.inner().matches(visitor)
    }
}

// ─── Shared helpers ─────────────────────────────────────────────────────

/// Device payload of a visit that is usable for matching: present,
/// non-empty and not flagged as a bot.
pub(crate) fn usable_device_payload(visitor: &VisitorInfo) -> Option<&Map<String, Value>> {
    if visitor.is_bot() {
        return None;
    }
    visitor
        .provider_data(DEVICE_PROVIDER)
        .and_then(Value::as_object)
        .filter(|payload| !payload.is_empty())
}

/// Lower-cased, non-empty string at `payload[section][field]`.
pub(crate) fn nested_str(payload: &Map<String, Value>, section: &str, field: &str) -> Option<String> {
    payload
        .get(section)
        .and_then(|s| s.get(field))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Optional string setting. Missing or null is `None`; any non-string
/// value is a configuration error.
pub(crate) fn optional_string(config: &ConditionConfig, key: &str) -> TargetingResult<Option<String>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_ascii_lowercase())),
        Some(other) => Err(TargetingError::InvalidCondition(format!(
            "`{key}` must be a string, got {other}"
        ))),
    }
}

/// String or list-of-strings setting, lower-cased with blanks dropped.
pub(crate) fn string_list(config: &ConditionConfig, key: &str) -> TargetingResult<Vec<String>> {
    let values = match config.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| {
                    TargetingError::InvalidCondition(format!("`{key}` entries must be strings"))
                })
            })
            .collect::<TargetingResult<Vec<_>>>()?,
        Some(other) => {
            return Err(TargetingError::InvalidCondition(format!(
                "`{key}` must be a string or a list of strings, got {other}"
            )))
        }
    };
    Ok(values
        .into_iter()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect())
}

pub(crate) fn optional_u64(config: &ConditionConfig, key: &str) -> TargetingResult<Option<u64>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            TargetingError::InvalidCondition(format!(
                "`{key}` must be a non-negative integer, got {value}"
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> ConditionConfig {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_config_dispatches_on_kind() {
        let cfg = config(json!({"platform": "mobile"}));
        let cond = TargetingCondition::from_config("hardware_platform", &cfg).unwrap();
        assert_eq!(cond.kind(), "hardware_platform");
        assert!(cond.can_match());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = TargetingCondition::from_config("weather", &ConditionConfig::new()).unwrap_err();
        assert!(matches!(err, TargetingError::UnknownCondition(k) if k == "weather"));
    }

    #[test]
    fn test_missing_optional_keys_do_not_fail() {
        for kind in ["hardware_platform", "operating_system", "browser", "visit_count"] {
            let cond = TargetingCondition::from_config(kind, &ConditionConfig::new()).unwrap();
            assert!(!cond.can_match(), "{kind} should be gated off without config");
        }
    }

    #[test]
    fn test_string_list_accepts_scalar_and_array() {
        assert_eq!(
            string_list(&config(json!({"os": "iOS"})), "os").unwrap(),
            vec!["ios".to_string()]
        );
        assert_eq!(
            string_list(&config(json!({"os": ["Android", " ", "Linux"]})), "os").unwrap(),
            vec!["android".to_string(), "linux".to_string()]
        );
        assert!(string_list(&config(json!({"os": 3})), "os").is_err());
    }
}
