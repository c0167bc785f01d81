use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quote::QuoteId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Lifecycle,
    Pricing,
    Loyalty,
    Token,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Pricing => "pricing",
            Self::Loyalty => "loyalty",
            Self::Token => "token",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
}

/// Who is acting and under which request; stamped onto every event it builds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(correlation_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), actor: actor.into() }
    }

    pub fn event(
        &self,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            quote_id: None,
            correlation_id: self.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: self.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub quote_id: Option<QuoteId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn for_quote(mut self, quote_id: &QuoteId) -> Self {
        self.quote_id = Some(quote_id.clone());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Keeps every event in memory; used by tests to assert on the audit trail.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.filtered(|event| event.event_type == event_type)
    }

    pub fn events_for_quote(&self, quote_id: &QuoteId) -> Vec<AuditEvent> {
        self.filtered(|event| event.quote_id.as_ref() == Some(quote_id))
    }

    fn filtered(&self, keep: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| keep(event)).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(event);
    }
}

/// Writes audit events into the structured log stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let quote_id = event.quote_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-");
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        if event.outcome == AuditOutcome::Success {
            tracing::info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                quote_id,
                category = event.category.as_str(),
                actor = %event.actor,
                metadata = %metadata,
                "quote audit"
            );
        } else {
            tracing::warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                quote_id,
                category = event.category.as_str(),
                actor = %event.actor,
                metadata = %metadata,
                "quote audit: rejected"
            );
        }
    }
}
