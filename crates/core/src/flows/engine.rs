use rust_decimal::Decimal;
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::account::AccountId;
use crate::domain::actor::Actor;
use crate::domain::quote::{BookingStatus, Quote, QuoteStatus};
use crate::flows::states::{
    FlowAction, LifecycleCommand, LifecycleEvent, LifecycleState, QuoteOutcome,
    TransitionContext, TransitionOutcome,
};
use crate::loyalty;
use crate::tokens::ApprovalTokenIssuer;

pub trait FlowDefinition {
    fn transition(
        &self,
        quote: &Quote,
        command: &LifecycleCommand,
        context: &TransitionContext,
    ) -> Result<Transition, TransitionError>;
}

/// The updated record plus what changed; the input record is never touched.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub quote: Quote,
    pub outcome: TransitionOutcome,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("{actor} may not {}", .event.as_str())]
    Unauthorized { event: LifecycleEvent, actor: String },
    #[error("a final price is required before {}", .event.as_str())]
    MissingFinalPrice { event: LifecycleEvent },
    #[error("{0}")]
    InvalidInput(String),
    #[error(
        "{} is not permitted from {}/{}",
        .event.as_str(),
        .quote_status.as_str(),
        .status.as_str()
    )]
    NotPermitted { event: LifecycleEvent, quote_status: QuoteStatus, status: BookingStatus },
    #[error("quote is {} and can no longer {}", .status.as_str(), .event.as_str())]
    Terminal { event: LifecycleEvent, status: BookingStatus },
}

/// The quote approval workflow as an explicit transition table.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuoteLifecycleFlow {
    issuer: ApprovalTokenIssuer,
}

impl FlowDefinition for QuoteLifecycleFlow {
    fn transition(
        &self,
        quote: &Quote,
        command: &LifecycleCommand,
        context: &TransitionContext,
    ) -> Result<Transition, TransitionError> {
        let from = LifecycleState::of(quote);
        let event = command.event();
        let mut next = quote.clone();

        let actions = match command {
            LifecycleCommand::PriceAndSend { final_price, notes } => {
                price_and_send(&mut next, *final_price, notes.as_deref(), context)?
            }
            LifecycleCommand::CustomerAccept => customer_accept(&mut next, context)?,
            LifecycleCommand::CustomerDecline { reason } => {
                customer_decline(&mut next, reason.as_deref(), context)?
            }
            LifecycleCommand::AnonymousAccept { token, register_as } => {
                anonymous_accept(&self.issuer, &mut next, token, register_as.as_ref(), context)?
            }
            LifecycleCommand::AnonymousDecline { token, reason } => {
                anonymous_decline(&self.issuer, &mut next, token, reason.as_deref(), context)?
            }
            LifecycleCommand::SetStatus { status, final_price, notes } => {
                match set_status(&mut next, *status, *final_price, notes.as_deref(), context)? {
                    Some(actions) => actions,
                    None => {
                        return Ok(Transition {
                            quote: quote.clone(),
                            outcome: TransitionOutcome {
                                from,
                                to: from,
                                event,
                                actions: Vec::new(),
                                changed: false,
                            },
                        });
                    }
                }
            }
            LifecycleCommand::ConvertToBooking { final_price, notes } => {
                convert_to_booking(&mut next, *final_price, notes.as_deref(), context)?
            }
        };

        next.updated_at = context.now;
        let to = LifecycleState::of(&next);
        Ok(Transition {
            quote: next,
            outcome: TransitionOutcome { from, to, event, actions, changed: true },
        })
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn apply(
        &self,
        quote: &Quote,
        command: &LifecycleCommand,
        context: &TransitionContext,
    ) -> Result<Transition, TransitionError> {
        self.flow.transition(quote, command, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        quote: &Quote,
        command: &LifecycleCommand,
        context: &TransitionContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Transition, TransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(quote, command, context);
        let category = match command {
            LifecycleCommand::AnonymousAccept { .. }
            | LifecycleCommand::AnonymousDecline { .. } => AuditCategory::Token,
            _ => AuditCategory::Lifecycle,
        };
        match &result {
            Ok(transition) => {
                sink.emit(
                    audit
                        .event("quote.transition_applied", category, AuditOutcome::Success)
                        .for_quote(&quote.id)
                        .at(context.now)
                        .with_metadata("event", transition.outcome.event.as_str())
                        .with_metadata("from", transition.outcome.from.quote_status.as_str())
                        .with_metadata("to", transition.outcome.to.quote_status.as_str())
                        .with_metadata("status", transition.outcome.to.status.as_str())
                        .with_metadata("changed", transition.outcome.changed.to_string()),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("quote.transition_rejected", category, AuditOutcome::Rejected)
                        .for_quote(&quote.id)
                        .at(context.now)
                        .with_metadata("event", command.event().as_str())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<QuoteLifecycleFlow> {
    fn default() -> Self {
        Self::new(QuoteLifecycleFlow::default())
    }
}

fn require_admin(event: LifecycleEvent, actor: &Actor) -> Result<(), TransitionError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(TransitionError::Unauthorized { event, actor: actor.label() })
    }
}

fn require_owner_or_admin(
    event: LifecycleEvent,
    quote: &Quote,
    actor: &Actor,
) -> Result<(), TransitionError> {
    let allowed = match actor {
        Actor::Admin => true,
        Actor::Customer(account_id) => quote.is_owned_by(account_id),
        Actor::Anonymous => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(TransitionError::Unauthorized { event, actor: actor.label() })
    }
}

fn require_live(event: LifecycleEvent, quote: &Quote) -> Result<(), TransitionError> {
    if quote.status.is_terminal() {
        Err(TransitionError::Terminal { event, status: quote.status })
    } else {
        Ok(())
    }
}

fn require_quote_status(
    event: LifecycleEvent,
    quote: &Quote,
    expected: QuoteStatus,
) -> Result<(), TransitionError> {
    if quote.quote_status == expected {
        Ok(())
    } else {
        Err(TransitionError::NotPermitted {
            event,
            quote_status: quote.quote_status,
            status: quote.status,
        })
    }
}

fn require_final_price(event: LifecycleEvent, quote: &Quote) -> Result<(), TransitionError> {
    if quote.final_price.is_some() {
        Ok(())
    } else {
        Err(TransitionError::MissingFinalPrice { event })
    }
}

fn validate_price(price: Decimal) -> Result<Decimal, TransitionError> {
    if price.is_sign_negative() {
        Err(TransitionError::InvalidInput(format!("final price {price} may not be negative")))
    } else {
        Ok(price)
    }
}

/// Token check shared by both anonymous transitions. Runs before any state
/// guard so a consumed token always reads as invalid rather than as a conflict.
fn require_token(
    issuer: &ApprovalTokenIssuer,
    quote: &Quote,
    supplied: &str,
    context: &TransitionContext,
) -> Result<(), TransitionError> {
    let check = issuer.validate(
        quote.approval_token.as_ref(),
        quote.token_expires_at,
        supplied,
        context.now,
    );
    if check.is_valid() {
        Ok(())
    } else {
        Err(TransitionError::InvalidToken)
    }
}

fn record_note(quote: &mut Quote, prefix: &str, note: Option<&str>) {
    if let Some(note) = note.map(str::trim).filter(|note| !note.is_empty()) {
        quote.append_admin_note(&format!("{prefix}: {note}"));
    }
}

fn price_and_send(
    quote: &mut Quote,
    final_price: Decimal,
    notes: Option<&str>,
    context: &TransitionContext,
) -> Result<Vec<FlowAction>, TransitionError> {
    let event = LifecycleEvent::PriceAndSend;
    require_admin(event, &context.actor)?;
    require_live(event, quote)?;
    require_quote_status(event, quote, QuoteStatus::PendingAdmin)?;
    let final_price = validate_price(final_price)?;

    let with_token = quote.account_id.is_none();
    if with_token {
        let minted = context.minted_token.clone().ok_or_else(|| {
            TransitionError::InvalidInput(
                "an approval token must be minted to send to an unregistered customer".to_owned(),
            )
        })?;
        quote.approval_token = Some(minted.token);
        quote.token_expires_at = Some(minted.expires_at);
        quote.quote_status = QuoteStatus::PendingEmail;
    } else {
        quote.quote_status = QuoteStatus::PendingCustomer;
    }

    quote.final_price = Some(final_price);
    quote.sent_to_customer_at = Some(context.now);
    if let Some(notes) = notes {
        quote.append_admin_note(notes);
    }

    Ok(vec![FlowAction::SendQuoteReadyEmail { with_token }])
}

fn customer_accept(
    quote: &mut Quote,
    context: &TransitionContext,
) -> Result<Vec<FlowAction>, TransitionError> {
    let event = LifecycleEvent::CustomerAccept;
    require_owner_or_admin(event, quote, &context.actor)?;
    require_live(event, quote)?;
    require_quote_status(event, quote, QuoteStatus::PendingCustomer)?;
    require_final_price(event, quote)?;

    quote.quote_status = QuoteStatus::Accepted;
    quote.status = BookingStatus::Booked;
    quote.booked_at = Some(context.now);
    quote.customer_responded_at = Some(context.now);
    Ok(Vec::new())
}

fn customer_decline(
    quote: &mut Quote,
    reason: Option<&str>,
    context: &TransitionContext,
) -> Result<Vec<FlowAction>, TransitionError> {
    let event = LifecycleEvent::CustomerDecline;
    require_owner_or_admin(event, quote, &context.actor)?;
    require_live(event, quote)?;
    require_quote_status(event, quote, QuoteStatus::PendingCustomer)?;
    require_final_price(event, quote)?;

    quote.quote_status = QuoteStatus::Declined;
    quote.status = BookingStatus::Cancelled;
    quote.customer_responded_at = Some(context.now);
    record_note(quote, "Customer declined", reason);
    Ok(Vec::new())
}

fn anonymous_accept(
    issuer: &ApprovalTokenIssuer,
    quote: &mut Quote,
    token: &str,
    register_as: Option<&AccountId>,
    context: &TransitionContext,
) -> Result<Vec<FlowAction>, TransitionError> {
    let event = LifecycleEvent::AnonymousAccept;
    require_token(issuer, quote, token, context)?;
    require_live(event, quote)?;
    require_quote_status(event, quote, QuoteStatus::PendingEmail)?;
    require_final_price(event, quote)?;

    if let Some(account_id) = register_as {
        if quote.account_id.is_some() {
            return Err(TransitionError::NotPermitted {
                event,
                quote_status: quote.quote_status,
                status: quote.status,
            });
        }
        quote.account_id = Some(account_id.clone());
    }

    quote.clear_approval_token();
    quote.quote_status = QuoteStatus::Accepted;
    quote.status = BookingStatus::Booked;
    quote.booked_at = Some(context.now);
    quote.customer_responded_at = Some(context.now);
    Ok(vec![FlowAction::SendOutcomeEmail(QuoteOutcome::Accepted)])
}

fn anonymous_decline(
    issuer: &ApprovalTokenIssuer,
    quote: &mut Quote,
    token: &str,
    reason: Option<&str>,
    context: &TransitionContext,
) -> Result<Vec<FlowAction>, TransitionError> {
    let event = LifecycleEvent::AnonymousDecline;
    require_token(issuer, quote, token, context)?;
    require_live(event, quote)?;
    require_quote_status(event, quote, QuoteStatus::PendingEmail)?;
    require_final_price(event, quote)?;

    quote.clear_approval_token();
    quote.quote_status = QuoteStatus::Declined;
    quote.status = BookingStatus::Cancelled;
    quote.customer_responded_at = Some(context.now);
    record_note(quote, "Customer declined", reason);
    Ok(vec![FlowAction::SendOutcomeEmail(QuoteOutcome::Declined)])
}

/// Admin status edit. Returns `None` for a repeat of the current terminal status,
/// unless a completed quote has an unclaimed award, which the repeat re-claims.
fn set_status(
    quote: &mut Quote,
    status: BookingStatus,
    final_price: Option<Decimal>,
    notes: Option<&str>,
    context: &TransitionContext,
) -> Result<Option<Vec<FlowAction>>, TransitionError> {
    let event = LifecycleEvent::SetStatus;
    require_admin(event, &context.actor)?;
    if quote.status.is_terminal() {
        if quote.status == status {
            if status == BookingStatus::Completed {
                if let Some(award) = completion_award(quote)? {
                    return Ok(Some(vec![award]));
                }
            }
            return Ok(None);
        }
        return Err(TransitionError::Terminal { event, status: quote.status });
    }

    if let Some(price) = final_price {
        quote.final_price = Some(validate_price(price)?);
        if quote.quote_status == QuoteStatus::PendingAdmin {
            quote.quote_status = QuoteStatus::Converted;
        }
    }
    if let Some(notes) = notes {
        quote.append_admin_note(notes);
    }

    quote.status = status;
    let mut actions = Vec::new();
    match status {
        BookingStatus::Confirmed => {
            quote.confirmed_at.get_or_insert(context.now);
        }
        BookingStatus::Booked => {
            quote.booked_at.get_or_insert(context.now);
        }
        BookingStatus::Completed => {
            quote.completed_at = Some(context.now);
            quote.clear_approval_token();
            if let Some(award) = completion_award(quote)? {
                actions.push(award);
            }
        }
        BookingStatus::Cancelled => quote.clear_approval_token(),
        _ => {}
    }
    Ok(Some(actions))
}

/// Claims the one-off loyalty award on the record itself. The write of this
/// record is what makes the award happen at most once.
fn completion_award(quote: &mut Quote) -> Result<Option<FlowAction>, TransitionError> {
    let (Some(final_price), Some(account_id), None) =
        (quote.final_price, quote.account_id.clone(), quote.loyalty_points_earned)
    else {
        return Ok(None);
    };
    let points = loyalty::points_earned(final_price, quote.trip.vehicle_class)
        .map_err(|error| TransitionError::InvalidInput(error.to_string()))?;
    quote.loyalty_points_earned = Some(points);
    Ok(Some(FlowAction::AwardLoyaltyPoints { account_id, points, amount: final_price }))
}

fn convert_to_booking(
    quote: &mut Quote,
    final_price: Decimal,
    notes: Option<&str>,
    context: &TransitionContext,
) -> Result<Vec<FlowAction>, TransitionError> {
    let event = LifecycleEvent::ConvertToBooking;
    require_admin(event, &context.actor)?;
    require_live(event, quote)?;

    quote.final_price = Some(validate_price(final_price)?);
    quote.booking_notes = notes.map(str::trim).filter(|notes| !notes.is_empty()).map(str::to_owned);
    quote.clear_approval_token();
    quote.quote_status = QuoteStatus::Converted;
    quote.status = BookingStatus::Booked;
    quote.booked_at = Some(context.now);
    Ok(Vec::new())
}
