//! Targeting conditions and rule evaluation.
//!
//! A [`Rule`] groups [`TargetingCondition`]s; the [`RuleEvaluator`] resolves
//! the data providers they need and records the outcome on the visitor.

#![warn(clippy::unwrap_used)]

pub mod browser;
pub mod condition;
pub mod evaluator;
pub mod hardware_platform;
pub mod operating_system;
pub mod rule;
pub mod visit_count;

pub use condition::{Condition, ConditionConfig, TargetingCondition};
pub use evaluator::RuleEvaluator;
pub use hardware_platform::{HardwarePlatform, ALL_PLATFORMS};
pub use rule::{LogicalOperator, Rule, RuleBuilder};
