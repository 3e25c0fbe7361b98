//! Rule evaluation against a single visit.

use std::collections::{BTreeMap, BTreeSet};
use targeting_core::{DataProviderRegistry, RuleMatch, VisitorInfo};
use tracing::debug;

use crate::condition::{Condition, TargetingCondition};
use crate::rule::{LogicalOperator, Rule};

pub struct RuleEvaluator {
    registry: DataProviderRegistry,
}

impl RuleEvaluator {
    pub fn new(registry: DataProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DataProviderRegistry {
        &self.registry
    }

    /// Evaluate one rule and store its [`RuleMatch`] on the visitor under the
    /// rule name. Variables recorded by conditions only survive when the rule
    /// as a whole matches.
    pub fn evaluate(&self, rule: &Rule, visitor: &mut VisitorInfo) -> bool {
        let keys: BTreeSet<&str> = rule
            .conditions
            .iter()
            .flat_map(|c| c.data_provider_keys().iter().copied())
            .collect();
        self.registry.resolve(keys, visitor);

        // Leftovers from a caller that recorded outside a rule.
        visitor.take_recorded_variables();

        let matched = !rule.conditions.is_empty()
            && match rule.operator {
                LogicalOperator::And => rule.conditions.iter().all(|c| Self::check(c, visitor)),
                LogicalOperator::Or => rule.conditions.iter().any(|c| Self::check(c, visitor)),
            };

        let recorded = visitor.take_recorded_variables();
        let variables = if matched { recorded } else { BTreeMap::new() };
        debug!(
            rule = %rule.name,
            matched,
            variables = variables.len(),
            "Rule evaluated"
        );
        visitor.set_match_result(rule.name.clone(), RuleMatch { matched, variables });
        matched
    }

    /// Evaluate every rule in order and return the names of those that matched.
    pub fn evaluate_all(&self, rules: &[Rule], visitor: &mut VisitorInfo) -> Vec<String> {
        rules
            .iter()
            .filter(|rule| self.evaluate(rule, visitor))
            .map(|rule| rule.name.clone())
            .collect()
    }

    fn check(condition: &TargetingCondition, visitor: &mut VisitorInfo) -> bool {
        if !condition.can_match() {
            debug!(kind = condition.kind(), "Condition gated off by its configuration");
            return false;
        }
        condition.matches(visitor)
    }
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new(DataProviderRegistry::with_defaults())
    }
}
