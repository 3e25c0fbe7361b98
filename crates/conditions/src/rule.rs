//! Rules: named groups of conditions, plus a fluent builder and the JSON
//! rule-file format.

use serde::{Deserialize, Serialize};
use targeting_core::TargetingResult;

use crate::browser::Browser;
use crate::condition::{ConditionConfig, TargetingCondition};
use crate::hardware_platform::HardwarePlatform;
use crate::operating_system::OperatingSystem;
use crate::visit_count::VisitCount;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub operator: LogicalOperator,
    pub conditions: Vec<TargetingCondition>,
}

/// Serialized form of one condition: `{"type": "hardware_platform", "platform": "mobile"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub config: ConditionConfig,
}

/// Serialized form of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default)]
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,
}

impl Rule {
    pub fn from_definition(definition: RuleDefinition) -> TargetingResult<Self> {
        let conditions = definition
            .conditions
            .iter()
            .map(|c| TargetingCondition::from_config(&c.kind, &c.config))
            .collect::<TargetingResult<Vec<_>>>()?;
        Ok(Self {
            name: definition.name,
            operator: definition.operator,
            conditions,
        })
    }

    /// Parse a JSON array of rule definitions.
    pub fn parse_all(json: &str) -> TargetingResult<Vec<Self>> {
        let definitions: Vec<RuleDefinition> = serde_json::from_str(json)?;
        definitions.into_iter().map(Self::from_definition).collect()
    }
}

pub struct RuleBuilder {
    name: String,
    operator: LogicalOperator,
    conditions: Vec<TargetingCondition>,
}

impl RuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operator: LogicalOperator::And,
            conditions: Vec::new(),
        }
    }

    pub fn with_or(mut self) -> Self {
        self.operator = LogicalOperator::Or;
        self
    }

    pub fn condition(mut self, condition: TargetingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn hardware_platform(self, platform: impl Into<String>) -> Self {
        self.condition(TargetingCondition::HardwarePlatform(HardwarePlatform::new(platform)))
    }

    pub fn operating_system<I, S>(self, systems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.condition(TargetingCondition::OperatingSystem(OperatingSystem::new(systems)))
    }

    pub fn browser<I, S>(self, browsers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.condition(TargetingCondition::Browser(Browser::new(browsers)))
    }

    pub fn visit_count(self, min: Option<u64>, max: Option<u64>) -> Self {
        self.condition(TargetingCondition::VisitCount(VisitCount::between(min, max)))
    }

    pub fn build(self) -> Rule {
        Rule {
            name: self.name,
            operator: self.operator,
            conditions: self.conditions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use targeting_core::TargetingError;

    #[test]
    fn test_parse_rule_file() {
        let rules = Rule::parse_all(
            r#"[
                {"name": "mobile_users", "conditions": [{"type": "hardware_platform", "platform": "mobile"}]},
                {"name": "apple_or_returning", "operator": "or", "conditions": [
                    {"type": "operating_system", "os": ["ios", "macos"]},
                    {"type": "visit_count", "min": 2}
                ]}
            ]"#,
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0], RuleBuilder::new("mobile_users").hardware_platform("mobile").build());
        assert_eq!(rules[1].operator, LogicalOperator::Or);
        assert_eq!(rules[1].conditions.len(), 2);
    }

    #[test]
    fn test_unknown_condition_type_fails_parsing() {
        let err = Rule::parse_all(r#"[{"name": "r", "conditions": [{"type": "moon_phase"}]}]"#)
            .unwrap_err();
        assert!(matches!(err, TargetingError::UnknownCondition(_)));
    }

    #[test]
    fn test_malformed_json_is_a_serialization_error() {
        let err = Rule::parse_all("not json").unwrap_err();
        assert!(matches!(err, TargetingError::Serialization(_)));
    }
}
