//! Per-request visitor context.
//!
//! A [`VisitorInfo`] lives for exactly one visit. It carries the visitor
//! identity (absent for anonymous traffic), the raw request attributes that
//! data providers read, the provider payloads fetched so far, and the rule
//! match results produced by the evaluator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::provider::DEVICE_PROVIDER;

/// Raw attributes of the incoming visit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitRequest {
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Anything else the caller knows about the visit (visit counters, ...).
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

/// Outcome of one rule for one visit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub matched: bool,
    /// Variables recorded by the conditions of a matching rule,
    /// e.g. `platform = "mobile"`.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct VisitorInfo {
    visitor_id: Option<String>,
    request: VisitRequest,
    /// `None` values are cached misses: the provider was asked and had nothing.
    provider_data: HashMap<String, Option<Value>>,
    match_results: BTreeMap<String, RuleMatch>,
    recorded: BTreeMap<String, Value>,
}

impl VisitorInfo {
    pub fn new(request: VisitRequest) -> Self {
        Self {
            request,
            ..Default::default()
        }
    }

    /// A visit without a tracking identifier.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_visitor_id(mut self, visitor_id: impl Into<String>) -> Self {
        self.assign_visitor_id(visitor_id);
        self
    }

    /// The resolved visitor ID. Empty identifiers count as unresolved.
    pub fn visitor_id(&self) -> Option<&str> {
        self.visitor_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn is_identified(&self) -> bool {
        self.visitor_id().is_some()
    }

    /// Promote an anonymous visit to an identified one. Returns `false` and
    /// leaves the context untouched if an ID is already assigned or the new
    /// ID is empty.
    pub fn assign_visitor_id(&mut self, visitor_id: impl Into<String>) -> bool {
        let visitor_id = visitor_id.into();
        if self.is_identified() || visitor_id.is_empty() {
            return false;
        }
        self.visitor_id = Some(visitor_id);
        true
    }

    /// Issue a fresh tracking identifier if the visit is still anonymous and
    /// return the identifier now in effect.
    pub fn issue_visitor_id(&mut self) -> String {
        if let Some(id) = self.visitor_id() {
            return id.to_string();
        }
        let id = Uuid::new_v4().to_string();
        self.visitor_id = Some(id.clone());
        id
    }

    pub fn request(&self) -> &VisitRequest {
        &self.request
    }

    /// Add a request attribute unless the caller already supplied one.
    /// Only affects providers resolved after the call.
    pub fn default_request_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.request
            .attributes
            .entry(name.into())
            .or_insert_with(|| value.into());
    }

    // ─── Provider data ──────────────────────────────────────────────────

    /// Whether the provider for `key` has already been consulted.
    pub fn is_resolved(&self, key: &str) -> bool {
        self.provider_data.contains_key(key)
    }

    /// Cached payload of a provider, `None` if absent or not yet fetched.
    pub fn provider_data(&self, key: &str) -> Option<&Value> {
        self.provider_data.get(key).and_then(|v| v.as_ref())
    }

    pub fn cache_provider_data(&mut self, key: impl Into<String>, payload: Option<Value>) {
        self.provider_data.insert(key.into(), payload);
    }

    /// True when the device provider flagged this visit as a bot.
    pub fn is_bot(&self) -> bool {
        self.provider_data(DEVICE_PROVIDER)
            .and_then(|payload| payload.get("is_bot"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    // ─── Match results ──────────────────────────────────────────────────

    /// Record a matched variable for the rule currently being evaluated.
    pub fn record_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.recorded.insert(name.into(), value.into());
    }

    /// Drain the variables recorded since the last call.
    pub fn take_recorded_variables(&mut self) -> BTreeMap<String, Value> {
        std::mem::take(&mut self.recorded)
    }

    pub fn set_match_result(&mut self, rule: impl Into<String>, result: RuleMatch) {
        self.match_results.insert(rule.into(), result);
    }

    pub fn match_result(&self, rule: &str) -> Option<&RuleMatch> {
        self.match_results.get(rule)
    }

    pub fn match_results(&self) -> &BTreeMap<String, RuleMatch> {
        &self.match_results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_anonymous_visit_has_no_id() {
        let visitor = VisitorInfo::anonymous();
        assert!(visitor.visitor_id().is_none());
        assert!(!visitor.is_identified());
    }

    #[test]
    fn test_empty_id_is_not_resolved() {
        let visitor = VisitorInfo::anonymous().with_visitor_id("");
        assert!(visitor.visitor_id().is_none());
    }

    #[test]
    fn test_promotion_keeps_first_id() {
        let mut visitor = VisitorInfo::anonymous();
        assert!(visitor.assign_visitor_id("v-1"));
        assert!(!visitor.assign_visitor_id("v-2"));
        assert_eq!(visitor.visitor_id(), Some("v-1"));
        assert_eq!(visitor.issue_visitor_id(), "v-1");
    }

    #[test]
    fn test_issue_visitor_id_mints_uuid() {
        let mut visitor = VisitorInfo::anonymous();
        let id = visitor.issue_visitor_id();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(visitor.visitor_id(), Some(id.as_str()));
    }

    #[test]
    fn test_cached_miss_counts_as_resolved() {
        let mut visitor = VisitorInfo::anonymous();
        visitor.cache_provider_data("device", None);
        assert!(visitor.is_resolved("device"));
        assert!(visitor.provider_data("device").is_none());
        assert!(!visitor.is_bot());
    }

    #[test]
    fn test_bot_flag() {
        let mut visitor = VisitorInfo::anonymous();
        visitor.cache_provider_data("device", Some(json!({"is_bot": true})));
        assert!(visitor.is_bot());
    }

    #[test]
    fn test_recorded_variables_are_drained() {
        let mut visitor = VisitorInfo::anonymous();
        visitor.record_variable("platform", "mobile");
        let vars = visitor.take_recorded_variables();
        assert_eq!(vars.get("platform"), Some(&json!("mobile")));
        assert!(visitor.take_recorded_variables().is_empty());
    }
}
