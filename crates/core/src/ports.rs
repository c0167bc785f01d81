//! Seams to the collaborators the lifecycle controller drives: storage, the
//! external account service, outbound notifications and the clock.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::account::{Account, AccountId, NewAccount};
use crate::domain::quote::{Quote, QuoteFilter, QuoteId};
use crate::errors::StoreError;
use crate::flows::QuoteOutcome;
use crate::tokens::ApprovalToken;

#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError>;

    async fn insert(&self, quote: &Quote) -> Result<(), StoreError>;

    /// Conditional write: succeeds only while the stored version still equals
    /// `quote.version`, and returns the record with its version bumped.
    async fn update(&self, quote: &Quote) -> Result<Quote, StoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &QuoteId) -> Result<bool, StoreError>;

    /// Matching quotes, newest first.
    async fn list(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, StoreError>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Fails with `StoreError::Duplicate` when the email is already registered.
    async fn create(&self, profile: NewAccount) -> Result<Account, StoreError>;

    /// Versioned save, same contract as [`QuoteStore::update`].
    async fn save(&self, account: &Account) -> Result<Account, StoreError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification relay rejected the message with status {status}")]
    Rejected { status: u16 },
    #[error("notification template failed: {0}")]
    Template(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_quote_ready(
        &self,
        quote: &Quote,
        final_price: Decimal,
        notes: Option<&str>,
        token: Option<&ApprovalToken>,
    ) -> Result<(), NotificationError>;

    async fn send_outcome(&self, quote: &Quote, outcome: QuoteOutcome)
        -> Result<(), NotificationError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_quote_ready(
        &self,
        _quote: &Quote,
        _final_price: Decimal,
        _notes: Option<&str>,
        _token: Option<&ApprovalToken>,
    ) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn send_outcome(
        &self,
        _quote: &Quote,
        _outcome: QuoteOutcome,
    ) -> Result<(), NotificationError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentNotification {
    QuoteReady {
        quote_id: QuoteId,
        email: String,
        final_price: Decimal,
        notes: Option<String>,
        token: Option<String>,
    },
    Outcome {
        quote_id: QuoteId,
        email: String,
        outcome: QuoteOutcome,
    },
}

/// Test double that keeps every request, optionally failing each one after
/// recording it.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { sent: Arc::default(), failing: true }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, notification: SentNotification) -> Result<(), NotificationError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        if self.failing {
            Err(NotificationError::Transport("relay unreachable".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_quote_ready(
        &self,
        quote: &Quote,
        final_price: Decimal,
        notes: Option<&str>,
        token: Option<&ApprovalToken>,
    ) -> Result<(), NotificationError> {
        self.record(SentNotification::QuoteReady {
            quote_id: quote.id.clone(),
            email: quote.contact.email.clone(),
            final_price,
            notes: notes.map(str::to_owned),
            token: token.map(|token| token.as_str().to_owned()),
        })
    }

    async fn send_outcome(
        &self,
        quote: &Quote,
        outcome: QuoteOutcome,
    ) -> Result<(), NotificationError> {
        self.record(SentNotification::Outcome {
            quote_id: quote.id.clone(),
            email: quote.contact.email.clone(),
            outcome,
        })
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut current) => *current = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
