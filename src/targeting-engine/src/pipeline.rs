//! Visit processing: evaluate rules, keep session state, count visits in
//! durable storage and migrate session buckets at the end of the batch.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use targeting_conditions::{Rule, RuleEvaluator};
use targeting_core::config::ScopeConfig;
use targeting_core::{VisitRequest, VisitorInfo};
use targeting_storage::{record_matches, SessionStorage, TargetingStorage};
use tracing::debug;

/// Durable entry counting identified visits.
pub const VISIT_COUNT_ENTRY: &str = "visit_count";

/// One line of the visits file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitRecord {
    #[serde(default)]
    pub visitor_id: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl VisitRecord {
    fn into_parts(self) -> (Option<String>, VisitRequest) {
        let request = VisitRequest {
            user_agent: self.user_agent,
            url: self.url,
            referrer: self.referrer,
            ip: self.ip,
            attributes: self.attributes,
        };
        (self.visitor_id, request)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VisitOutcome {
    pub visitor_id: Option<String>,
    pub matched_rules: Vec<String>,
    pub visit_count: Option<u64>,
}

pub struct VisitProcessor {
    evaluator: RuleEvaluator,
    rules: Vec<Rule>,
    session: SessionStorage,
    durable: Box<dyn TargetingStorage>,
    scopes: ScopeConfig,
    issue_ids: bool,
    identified: BTreeSet<String>,
}

impl VisitProcessor {
    pub fn new(
        evaluator: RuleEvaluator,
        rules: Vec<Rule>,
        durable: Box<dyn TargetingStorage>,
        scopes: ScopeConfig,
    ) -> Self {
        Self {
            evaluator,
            rules,
            session: SessionStorage::new(),
            durable,
            scopes,
            issue_ids: false,
            identified: BTreeSet::new(),
        }
    }

    /// Give anonymous visits a fresh visitor ID.
    pub fn issue_ids(mut self, issue: bool) -> Self {
        self.issue_ids = issue;
        self
    }

    pub fn durable(&self) -> &dyn TargetingStorage {
        self.durable.as_ref()
    }

    pub fn session(&self) -> &SessionStorage {
        &self.session
    }

    pub fn process(&mut self, record: VisitRecord) -> anyhow::Result<VisitOutcome> {
        let (visitor_id, request) = record.into_parts();
        let mut visitor = VisitorInfo::new(request);
        if let Some(id) = visitor_id {
            visitor.assign_visitor_id(id);
        }
        if self.issue_ids && !visitor.is_identified() {
            visitor.issue_visitor_id();
        }

        let visit_count = self.count_visit(&mut visitor)?;
        let matched_rules = self.evaluator.evaluate_all(&self.rules, &mut visitor);
        record_matches(&self.session, &visitor, &self.scopes.session)?;

        if let Some(id) = visitor.visitor_id() {
            self.identified.insert(id.to_string());
        }
        debug!(
            visitor_id = ?visitor.visitor_id(),
            matched = matched_rules.len(),
            "Visit processed"
        );
        Ok(VisitOutcome {
            visitor_id: visitor.visitor_id().map(str::to_string),
            matched_rules,
            visit_count,
        })
    }

    /// Move every identified visitor's session bucket into durable storage.
    /// Returns the number of visitors migrated. A visitor stays pending until
    /// its own migration succeeds, so a failed call can be retried.
    pub fn finish(&mut self) -> anyhow::Result<usize> {
        let mut migrated = 0;
        while let Some(id) = self.identified.first().cloned() {
            let visitor = VisitorInfo::anonymous().with_visitor_id(id.as_str());
            self.durable
                .migrate_from(&self.session, &visitor, &self.scopes.session)?;
            self.session.clear(&visitor, None)?;
            self.identified.remove(&id);
            migrated += 1;
        }
        Ok(migrated)
    }

    /// Visitors whose session state has not been migrated yet.
    pub fn pending(&self) -> usize {
        self.identified.len()
    }

    fn count_visit(&self, visitor: &mut VisitorInfo) -> anyhow::Result<Option<u64>> {
        if !visitor.is_identified() {
            return Ok(None);
        }
        let scope = &self.scopes.persistent;
        let previous = self
            .durable
            .get(visitor, scope, VISIT_COUNT_ENTRY, json!(0))?
            .as_u64()
            .unwrap_or(0);
        let count = previous + 1;
        self.durable
            .set(visitor, scope, VISIT_COUNT_ENTRY, &json!(count))?;
        visitor.default_request_attribute(VISIT_COUNT_ENTRY, count);
        Ok(Some(count))
    }
}
