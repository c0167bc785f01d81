use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::account::AccountId;
use crate::domain::actor::Actor;
use crate::domain::quote::{BookingStatus, Quote, QuoteStatus};
use crate::tokens::{ApprovalTokenIssuer, IssuedToken};

/// Both status fields move together; this pair is the state of the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    pub quote_status: QuoteStatus,
    pub status: BookingStatus,
}

impl LifecycleState {
    pub fn of(quote: &Quote) -> Self {
        Self { quote_status: quote.quote_status, status: quote.status }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Create,
    PriceAndSend,
    CustomerAccept,
    CustomerDecline,
    AnonymousAccept,
    AnonymousDecline,
    SetStatus,
    ConvertToBooking,
    ApplyLoyaltyDiscount,
    Delete,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::PriceAndSend => "price_and_send",
            Self::CustomerAccept => "customer_accept",
            Self::CustomerDecline => "customer_decline",
            Self::AnonymousAccept => "anonymous_accept",
            Self::AnonymousDecline => "anonymous_decline",
            Self::SetStatus => "set_status",
            Self::ConvertToBooking => "convert_to_booking",
            Self::ApplyLoyaltyDiscount => "apply_loyalty_discount",
            Self::Delete => "delete",
        }
    }
}

/// An actor intent together with the data it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleCommand {
    PriceAndSend { final_price: Decimal, notes: Option<String> },
    CustomerAccept,
    CustomerDecline { reason: Option<String> },
    AnonymousAccept { token: String, register_as: Option<AccountId> },
    AnonymousDecline { token: String, reason: Option<String> },
    SetStatus { status: BookingStatus, final_price: Option<Decimal>, notes: Option<String> },
    ConvertToBooking { final_price: Decimal, notes: Option<String> },
}

impl LifecycleCommand {
    pub fn event(&self) -> LifecycleEvent {
        match self {
            Self::PriceAndSend { .. } => LifecycleEvent::PriceAndSend,
            Self::CustomerAccept => LifecycleEvent::CustomerAccept,
            Self::CustomerDecline { .. } => LifecycleEvent::CustomerDecline,
            Self::AnonymousAccept { .. } => LifecycleEvent::AnonymousAccept,
            Self::AnonymousDecline { .. } => LifecycleEvent::AnonymousDecline,
            Self::SetStatus { .. } => LifecycleEvent::SetStatus,
            Self::ConvertToBooking { .. } => LifecycleEvent::ConvertToBooking,
        }
    }
}

/// Inputs a transition may read besides the record itself.
#[derive(Clone, Debug)]
pub struct TransitionContext {
    pub actor: Actor,
    pub now: DateTime<Utc>,
    /// Pre-minted by the caller; consumed only when a quote goes to `pending_email`.
    pub minted_token: Option<IssuedToken>,
}

impl TransitionContext {
    pub fn new(actor: Actor, now: DateTime<Utc>) -> Self {
        Self { actor, now, minted_token: None }
    }

    pub fn with_minted_token(mut self, issuer: &ApprovalTokenIssuer) -> Self {
        self.minted_token = Some(issuer.issue(self.now));
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteOutcome {
    Accepted,
    Declined,
}

impl QuoteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }
}

/// Side effects the controller performs after the record write commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    SendQuoteReadyEmail { with_token: bool },
    SendOutcomeEmail(QuoteOutcome),
    AwardLoyaltyPoints { account_id: AccountId, points: i64, amount: Decimal },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub event: LifecycleEvent,
    pub actions: Vec<FlowAction>,
    /// False when the command was an idempotent repeat and nothing needs writing.
    pub changed: bool,
}
