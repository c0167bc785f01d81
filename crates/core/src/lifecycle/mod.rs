//! Quote lifecycle controller: loads records, runs them through the
//! transition table, commits with a versioned write and then performs the
//! side effects the transition asked for.

use std::sync::Arc;

use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use crate::domain::account::{
    Account, AccountId, NewAccount, RegistrationPayload, MIN_PASSWORD_LEN,
};
use crate::domain::actor::Actor;
use crate::domain::quote::{
    BookingStatus, Quote, QuoteFilter, QuoteId, QuoteIntake, QuoteStatus, QuoteSummary,
};
use crate::errors::{ApplicationError, DomainError, StoreError};
use crate::flows::{
    FlowAction, FlowEngine, LifecycleCommand, LifecycleEvent, QuoteLifecycleFlow,
    TransitionContext, TransitionOutcome,
};
use crate::loyalty::{self, DiscountPlan, LoyaltySummary};
use crate::ports::{
    AccountDirectory, Clock, NotificationError, Notifier, QuoteStore, SystemClock,
};
use crate::pricing::{EstimateRequest, PriceEstimate, PricingEngine, RateCard};
use crate::tokens::ApprovalTokenIssuer;

pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 3;

/// Who is calling and under which correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationContext {
    pub actor: Actor,
    pub correlation_id: String,
}

impl OperationContext {
    pub fn new(actor: Actor, correlation_id: impl Into<String>) -> Self {
        Self { actor, correlation_id: correlation_id.into() }
    }

    fn audit(&self) -> AuditContext {
        AuditContext::new(self.correlation_id.clone(), self.actor.label())
    }

    fn customer_id(&self) -> Result<&AccountId, DomainError> {
        match &self.actor {
            Actor::Customer(account_id) => Ok(account_id),
            other => Err(DomainError::Unauthorized(format!(
                "{} is not a signed-in customer",
                other.label()
            ))),
        }
    }

    fn require_admin(&self) -> Result<(), DomainError> {
        if self.actor.is_admin() {
            Ok(())
        } else {
            Err(DomainError::Unauthorized(format!("{} is not an admin", self.actor.label())))
        }
    }
}

/// What an anonymous token holder sees before deciding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCheckView {
    pub requires_registration: bool,
    pub email_registered: bool,
    pub quote: QuoteSummary,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountReceipt {
    pub quote_id: QuoteId,
    pub discount_amount: Decimal,
    pub points_discount: Decimal,
    pub tier_discount: Decimal,
    pub points_used: i64,
    pub remaining_points: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualBooking {
    pub intake: QuoteIntake,
    pub final_price: Option<Decimal>,
    pub notes: Option<String>,
}

struct Applied {
    quote: Quote,
    outcome: TransitionOutcome,
}

pub struct QuoteLifecycleController {
    quotes: Arc<dyn QuoteStore>,
    accounts: Arc<dyn AccountDirectory>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    pricing: Arc<dyn PricingEngine>,
    issuer: ApprovalTokenIssuer,
    engine: FlowEngine<QuoteLifecycleFlow>,
    max_write_attempts: u32,
}

impl QuoteLifecycleController {
    pub fn new(
        quotes: Arc<dyn QuoteStore>,
        accounts: Arc<dyn AccountDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            quotes,
            accounts,
            notifier,
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            pricing: Arc::new(RateCard::standard()),
            issuer: ApprovalTokenIssuer::default(),
            engine: FlowEngine::default(),
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingEngine>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    pub fn estimate(&self, request: &EstimateRequest) -> PriceEstimate {
        self.pricing.estimate(request)
    }

    pub async fn create_quote(
        &self,
        ctx: &OperationContext,
        mut intake: QuoteIntake,
    ) -> Result<Quote, ApplicationError> {
        intake.validate()?;
        intake.account_id = match &ctx.actor {
            Actor::Customer(account_id) => Some(account_id.clone()),
            Actor::Admin => intake.account_id,
            Actor::Anonymous => None,
        };
        if matches!(ctx.actor, Actor::Admin) {
            self.require_known_owner(&intake).await?;
        }

        let estimate = self.pricing.estimate(&estimate_request(&intake));
        let quote = Quote::open(intake, estimate.price, self.clock.now());
        self.quotes.insert(&quote).await?;

        self.record_event(ctx, &quote.id, "quote.created", AuditCategory::Pricing, |event| {
            event
                .with_metadata("estimated_price", estimate.price.to_string())
                .with_metadata("zone", estimate.breakdown.zone.to_string())
        });
        info!(
            event_name = "quote.lifecycle.created",
            correlation_id = %ctx.correlation_id,
            quote_id = %quote.id,
            estimated_price = %quote.estimated_price,
            "quote created"
        );
        Ok(quote)
    }

    /// Booking entered by an admin without a prior quote; skips approval.
    pub async fn create_manual_booking(
        &self,
        ctx: &OperationContext,
        booking: ManualBooking,
    ) -> Result<Quote, ApplicationError> {
        ctx.require_admin()?;
        booking.intake.validate()?;
        self.require_known_owner(&booking.intake).await?;
        if booking.final_price.is_some_and(|price| price.is_sign_negative()) {
            return Err(
                DomainError::Validation("final price may not be negative".to_owned()).into()
            );
        }

        let now = self.clock.now();
        let estimate = self.pricing.estimate(&estimate_request(&booking.intake));
        let mut quote = Quote::open(booking.intake, estimate.price, now);
        quote.final_price = Some(booking.final_price.unwrap_or(estimate.price));
        quote.status = BookingStatus::Booked;
        quote.quote_status = QuoteStatus::Converted;
        quote.booked_at = Some(now);
        quote.booking_notes = booking.notes.filter(|notes| !notes.trim().is_empty());
        self.quotes.insert(&quote).await?;

        self.record_event(
            ctx,
            &quote.id,
            "quote.manual_booking_created",
            AuditCategory::Lifecycle,
            |event| event,
        );
        info!(
            event_name = "quote.lifecycle.manual_booking_created",
            correlation_id = %ctx.correlation_id,
            quote_id = %quote.id,
            "manual booking created"
        );
        Ok(quote)
    }

    pub async fn get_quote(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
    ) -> Result<Quote, ApplicationError> {
        let quote = self.load(quote_id).await?;
        match &ctx.actor {
            Actor::Admin => Ok(quote),
            Actor::Customer(account_id) if quote.is_owned_by(account_id) => Ok(quote),
            other => Err(DomainError::Unauthorized(format!(
                "{} may not view quote {quote_id}",
                other.label()
            ))
            .into()),
        }
    }

    pub async fn list_quotes(
        &self,
        ctx: &OperationContext,
        filter: &QuoteFilter,
    ) -> Result<Vec<Quote>, ApplicationError> {
        ctx.require_admin()?;
        Ok(self.quotes.list(filter).await?)
    }

    pub async fn list_quotes_for_account(
        &self,
        ctx: &OperationContext,
    ) -> Result<Vec<Quote>, ApplicationError> {
        let account_id = ctx.customer_id()?.clone();
        let filter = QuoteFilter { account_id: Some(account_id), ..QuoteFilter::default() };
        Ok(self.quotes.list(&filter).await?)
    }

    pub async fn price_and_send(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        final_price: Decimal,
        notes: Option<String>,
    ) -> Result<Quote, ApplicationError> {
        let applied = self
            .transition(
                ctx,
                quote_id,
                LifecycleCommand::PriceAndSend { final_price, notes: notes.clone() },
            )
            .await?;
        self.dispatch(ctx, &applied, notes.as_deref()).await?;
        Ok(applied.quote)
    }

    pub async fn customer_accept(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
    ) -> Result<Quote, ApplicationError> {
        let applied = self.transition(ctx, quote_id, LifecycleCommand::CustomerAccept).await?;
        self.dispatch(ctx, &applied, None).await?;
        Ok(applied.quote)
    }

    pub async fn customer_decline(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        reason: Option<String>,
    ) -> Result<Quote, ApplicationError> {
        let applied =
            self.transition(ctx, quote_id, LifecycleCommand::CustomerDecline { reason }).await?;
        self.dispatch(ctx, &applied, None).await?;
        Ok(applied.quote)
    }

    /// Read-only token check; nothing is consumed.
    pub async fn anonymous_check_token(
        &self,
        quote_id: &QuoteId,
        token: &str,
    ) -> Result<TokenCheckView, ApplicationError> {
        let quote = self.load(quote_id).await?;
        self.check_token(&quote, token)?;
        let email_registered = self.accounts.find_by_email(&quote.contact.email).await?.is_some();
        Ok(TokenCheckView {
            requires_registration: quote.account_id.is_none(),
            email_registered,
            quote: quote.summary(),
        })
    }

    pub async fn anonymous_accept(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        token: &str,
    ) -> Result<Quote, ApplicationError> {
        let command =
            LifecycleCommand::AnonymousAccept { token: token.to_owned(), register_as: None };
        let applied = self.transition(ctx, quote_id, command).await?;
        self.dispatch(ctx, &applied, None).await?;
        Ok(applied.quote)
    }

    /// Registers the token holder under the quote's contact email, links the
    /// new account and accepts. If registration fails the quote is untouched.
    pub async fn anonymous_accept_with_registration(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        token: &str,
        registration: RegistrationPayload,
    ) -> Result<(Quote, Account), ApplicationError> {
        if registration.password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
            return Err(DomainError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ))
            .into());
        }

        let quote = self.load(quote_id).await?;
        // Dry run: every guard must pass before an account is created.
        let dry_run =
            LifecycleCommand::AnonymousAccept { token: token.to_owned(), register_as: None };
        let dry_run_context = TransitionContext::new(ctx.actor.clone(), self.clock.now());
        self.engine.apply(&quote, &dry_run, &dry_run_context)?;
        if quote.account_id.is_some() {
            return Err(DomainError::Conflict(format!(
                "quote {quote_id} already belongs to an account"
            ))
            .into());
        }

        let email = quote.contact.email.trim().to_owned();
        if self.accounts.find_by_email(&email).await?.is_some() {
            return Err(DomainError::Conflict(format!("{email} is already registered")).into());
        }
        let account = self
            .accounts
            .create(NewAccount {
                name: registration
                    .name
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| quote.contact.name.clone()),
                email,
                phone: registration.phone.or_else(|| Some(quote.contact.phone.clone())),
                password: registration.password,
            })
            .await?;
        self.record_event(
            ctx,
            quote_id,
            "account.registered_on_accept",
            AuditCategory::Token,
            |event| event.with_metadata("account_id", account.id.0.clone()),
        );

        let command = LifecycleCommand::AnonymousAccept {
            token: token.to_owned(),
            register_as: Some(account.id.clone()),
        };
        let applied = match self.transition(ctx, quote_id, command).await {
            Ok(applied) => applied,
            Err(error) => {
                warn!(
                    event_name = "quote.lifecycle.registration_orphaned",
                    correlation_id = %ctx.correlation_id,
                    quote_id = %quote_id,
                    account_id = %account.id,
                    error = %error,
                    "account registered but quote acceptance failed"
                );
                return Err(error);
            }
        };
        self.dispatch(ctx, &applied, None).await?;
        Ok((applied.quote, account))
    }

    pub async fn anonymous_decline(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        token: &str,
        reason: Option<String>,
    ) -> Result<Quote, ApplicationError> {
        let command = LifecycleCommand::AnonymousDecline { token: token.to_owned(), reason };
        let applied = self.transition(ctx, quote_id, command).await?;
        self.dispatch(ctx, &applied, None).await?;
        Ok(applied.quote)
    }

    pub async fn set_status(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        status: BookingStatus,
        final_price: Option<Decimal>,
        notes: Option<String>,
    ) -> Result<Quote, ApplicationError> {
        let command = LifecycleCommand::SetStatus { status, final_price, notes };
        let applied = self.transition(ctx, quote_id, command).await?;
        self.dispatch(ctx, &applied, None).await?;
        Ok(applied.quote)
    }

    pub async fn convert_to_booking(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        final_price: Decimal,
        notes: Option<String>,
    ) -> Result<Quote, ApplicationError> {
        let command = LifecycleCommand::ConvertToBooking { final_price, notes };
        let applied = self.transition(ctx, quote_id, command).await?;
        self.dispatch(ctx, &applied, None).await?;
        Ok(applied.quote)
    }

    pub async fn delete_quote(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
    ) -> Result<(), ApplicationError> {
        ctx.require_admin()?;
        if !self.quotes.delete(quote_id).await? {
            return Err(DomainError::not_found("quote", quote_id.0.clone()).into());
        }
        self.record_event(ctx, quote_id, "quote.deleted", AuditCategory::Lifecycle, |event| event);
        info!(
            event_name = "quote.lifecycle.deleted",
            correlation_id = %ctx.correlation_id,
            quote_id = %quote_id,
            "quote deleted"
        );
        Ok(())
    }

    pub async fn loyalty_summary(
        &self,
        ctx: &OperationContext,
    ) -> Result<LoyaltySummary, ApplicationError> {
        let account_id = ctx.customer_id()?;
        let account = self.load_account(account_id).await?;
        Ok(LoyaltySummary::for_account(&account))
    }

    /// Redeems points against a priced quote. The account is debited first and
    /// refunded if the quote cannot be written.
    pub async fn apply_loyalty_discount(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        points_to_use: i64,
    ) -> Result<DiscountReceipt, ApplicationError> {
        let account_id = ctx.customer_id()?.clone();
        let quote = self.load(quote_id).await?;
        let final_price = discount_guard(&quote, &account_id)?;

        let (account, plan) = self.debit_points(&account_id, final_price, points_to_use).await?;
        match self.write_discount(quote_id, &account_id, final_price, &plan).await {
            Ok(quote) => {
                self.record_event(
                    ctx,
                    quote_id,
                    "loyalty.discount_applied",
                    AuditCategory::Loyalty,
                    |event| {
                        event
                            .with_metadata("points_used", plan.points_used.to_string())
                            .with_metadata("discount_amount", plan.discount_amount.to_string())
                    },
                );
                info!(
                    event_name = "quote.lifecycle.discount_applied",
                    correlation_id = %ctx.correlation_id,
                    quote_id = %quote.id,
                    points_used = plan.points_used,
                    discount_amount = %plan.discount_amount,
                    "loyalty discount applied"
                );
                Ok(DiscountReceipt {
                    quote_id: quote.id,
                    discount_amount: plan.discount_amount,
                    points_discount: plan.points_discount,
                    tier_discount: plan.tier_discount,
                    points_used: plan.points_used,
                    remaining_points: account.loyalty_points,
                })
            }
            Err(error) => {
                self.adjust_points(&account_id, plan.points_used).await.map_err(|refund_error| {
                    warn!(
                        event_name = "quote.lifecycle.discount_refund_failed",
                        correlation_id = %ctx.correlation_id,
                        quote_id = %quote_id,
                        account_id = %account_id,
                        points = plan.points_used,
                        error = %refund_error,
                        "could not refund points after failed discount"
                    );
                    refund_error
                })?;
                self.record_event(
                    ctx,
                    quote_id,
                    "loyalty.discount_rejected",
                    AuditCategory::Loyalty,
                    |event| event.with_metadata("error", error.to_string()),
                );
                Err(error)
            }
        }
    }

    async fn load(&self, quote_id: &QuoteId) -> Result<Quote, ApplicationError> {
        self.quotes
            .find_by_id(quote_id)
            .await?
            .ok_or_else(|| DomainError::not_found("quote", quote_id.0.clone()).into())
    }

    async fn load_account(&self, account_id: &AccountId) -> Result<Account, ApplicationError> {
        self.accounts
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| DomainError::not_found("account", account_id.0.clone()).into())
    }

    async fn require_known_owner(&self, intake: &QuoteIntake) -> Result<(), ApplicationError> {
        let Some(account_id) = &intake.account_id else {
            return Ok(());
        };
        if self.accounts.find_by_id(account_id).await?.is_none() {
            return Err(DomainError::Validation(format!(
                "account {account_id} does not exist and cannot own a quote"
            ))
            .into());
        }
        Ok(())
    }

    fn check_token(&self, quote: &Quote, token: &str) -> Result<(), DomainError> {
        let check = self.issuer.validate(
            quote.approval_token.as_ref(),
            quote.token_expires_at,
            token,
            self.clock.now(),
        );
        if check.is_valid() {
            Ok(())
        } else {
            Err(DomainError::InvalidToken)
        }
    }

    /// Load, guard and conditionally write, re-reading on a stale write.
    async fn transition(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        command: LifecycleCommand,
    ) -> Result<Applied, ApplicationError> {
        let audit = ctx.audit();
        for attempt in 1..=self.max_write_attempts {
            let quote = self.load(quote_id).await?;
            let mut context = TransitionContext::new(ctx.actor.clone(), self.clock.now());
            let sends_link = matches!(command, LifecycleCommand::PriceAndSend { .. });
            if sends_link && quote.account_id.is_none() {
                context = context.with_minted_token(&self.issuer);
            }

            let transition = self.engine.apply_with_audit(
                &quote,
                &command,
                &context,
                self.audit.as_ref(),
                &audit,
            )?;
            if !transition.outcome.changed {
                return Ok(Applied { quote, outcome: transition.outcome });
            }

            match self.quotes.update(&transition.quote).await {
                Ok(stored) => {
                    info!(
                        event_name = "quote.lifecycle.transition_applied",
                        correlation_id = %ctx.correlation_id,
                        quote_id = %quote_id,
                        event = command.event().as_str(),
                        from = transition.outcome.from.quote_status.as_str(),
                        to = transition.outcome.to.quote_status.as_str(),
                        status = transition.outcome.to.status.as_str(),
                        "quote transition applied"
                    );
                    return Ok(Applied { quote: stored, outcome: transition.outcome });
                }
                Err(StoreError::StaleWrite { .. }) => {
                    warn!(
                        event_name = "quote.lifecycle.stale_write",
                        correlation_id = %ctx.correlation_id,
                        quote_id = %quote_id,
                        attempt,
                        "quote changed underneath the transition, retrying"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(DomainError::Conflict(format!(
            "quote {quote_id} kept changing during {}",
            command.event().as_str()
        ))
        .into())
    }

    /// Performs post-commit side effects. Notification failures are logged and dropped.
    async fn dispatch(
        &self,
        ctx: &OperationContext,
        applied: &Applied,
        notes: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let quote = &applied.quote;
        for action in &applied.outcome.actions {
            match action {
                FlowAction::SendQuoteReadyEmail { with_token } => {
                    let token = if *with_token { quote.approval_token.as_ref() } else { None };
                    let final_price = quote.final_price.unwrap_or(quote.estimated_price);
                    let result =
                        self.notifier.send_quote_ready(quote, final_price, notes, token).await;
                    self.log_notification(ctx, quote, "quote_ready", result);
                }
                FlowAction::SendOutcomeEmail(outcome) => {
                    let result = self.notifier.send_outcome(quote, *outcome).await;
                    self.log_notification(ctx, quote, outcome.as_str(), result);
                }
                FlowAction::AwardLoyaltyPoints { account_id, points, amount } => {
                    let awarded =
                        self.award_points(ctx, quote, account_id, *points, *amount).await;
                    if let Err(error) = awarded {
                        self.release_award(ctx, &quote.id, *points).await;
                        return Err(error);
                    }
                }
            }
        }
        Ok(())
    }

    fn log_notification(
        &self,
        ctx: &OperationContext,
        quote: &Quote,
        kind: &str,
        result: Result<(), NotificationError>,
    ) {
        match result {
            Ok(()) => info!(
                event_name = "notification.requested",
                correlation_id = %ctx.correlation_id,
                quote_id = %quote.id,
                kind,
                "notification requested"
            ),
            Err(error) => warn!(
                event_name = "notification.failed",
                correlation_id = %ctx.correlation_id,
                quote_id = %quote.id,
                kind,
                error = %error,
                "notification failed; transition kept"
            ),
        }
    }

    /// Credits the completion award. The quote write that recorded the points
    /// already happened, so this only retries the account side.
    async fn award_points(
        &self,
        ctx: &OperationContext,
        quote: &Quote,
        account_id: &AccountId,
        points: i64,
        amount: Decimal,
    ) -> Result<(), ApplicationError> {
        for attempt in 1..=self.max_write_attempts {
            let Some(mut account) = self.accounts.find_by_id(account_id).await? else {
                warn!(
                    event_name = "quote.lifecycle.award_account_missing",
                    correlation_id = %ctx.correlation_id,
                    quote_id = %quote.id,
                    account_id = %account_id,
                    "owning account no longer exists; award skipped"
                );
                return Ok(());
            };
            loyalty::record_completed_trip(&mut account, points, amount, self.clock.now());
            match self.accounts.save(&account).await {
                Ok(saved) => {
                    self.record_event(
                        ctx,
                        &quote.id,
                        "loyalty.points_awarded",
                        AuditCategory::Loyalty,
                        |event| {
                            event
                                .with_metadata("account_id", account_id.0.clone())
                                .with_metadata("points", points.to_string())
                                .with_metadata("tier", saved.tier.as_str())
                        },
                    );
                    info!(
                        event_name = "quote.lifecycle.points_awarded",
                        correlation_id = %ctx.correlation_id,
                        quote_id = %quote.id,
                        account_id = %account_id,
                        points,
                        balance = saved.loyalty_points,
                        tier = saved.tier.as_str(),
                        "loyalty points awarded"
                    );
                    return Ok(());
                }
                Err(StoreError::StaleWrite { .. }) => {
                    warn!(
                        event_name = "quote.lifecycle.stale_write",
                        correlation_id = %ctx.correlation_id,
                        account_id = %account_id,
                        attempt,
                        "account changed during award, retrying"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(DomainError::Conflict(format!("account {account_id} kept changing during award"))
            .into())
    }

    /// Clears the award claim after the credit failed, so a repeated completion
    /// can claim it again.
    async fn release_award(&self, ctx: &OperationContext, quote_id: &QuoteId, points: i64) {
        for attempt in 1..=self.max_write_attempts {
            let mut quote = match self.load(quote_id).await {
                Ok(quote) => quote,
                Err(error) => {
                    self.log_release_failure(ctx, quote_id, points, &error);
                    return;
                }
            };
            if quote.loyalty_points_earned != Some(points) {
                return;
            }
            quote.loyalty_points_earned = None;
            quote.updated_at = self.clock.now();
            match self.quotes.update(&quote).await {
                Ok(_) => {
                    self.record_event(
                        ctx,
                        quote_id,
                        "loyalty.award_released",
                        AuditCategory::Loyalty,
                        |event| event.with_metadata("points", points.to_string()),
                    );
                    warn!(
                        event_name = "quote.lifecycle.award_released",
                        correlation_id = %ctx.correlation_id,
                        quote_id = %quote_id,
                        points,
                        "award credit failed; claim released for a later completion"
                    );
                    return;
                }
                Err(StoreError::StaleWrite { .. }) => {
                    warn!(
                        event_name = "quote.lifecycle.stale_write",
                        correlation_id = %ctx.correlation_id,
                        quote_id = %quote_id,
                        attempt,
                        "quote changed while releasing award, retrying"
                    );
                }
                Err(error) => {
                    let error = ApplicationError::from(error);
                    self.log_release_failure(ctx, quote_id, points, &error);
                    return;
                }
            }
        }
        let exhausted: ApplicationError =
            DomainError::Conflict(format!("quote {quote_id} kept changing during award release"))
                .into();
        self.log_release_failure(ctx, quote_id, points, &exhausted);
    }

    fn log_release_failure(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        points: i64,
        error: &ApplicationError,
    ) {
        error!(
            event_name = "quote.lifecycle.award_release_failed",
            correlation_id = %ctx.correlation_id,
            quote_id = %quote_id,
            points,
            error = %error,
            "award claim could not be released"
        );
    }

    async fn debit_points(
        &self,
        account_id: &AccountId,
        final_price: Decimal,
        points_to_use: i64,
    ) -> Result<(Account, DiscountPlan), ApplicationError> {
        for _ in 0..self.max_write_attempts {
            let mut account = self.load_account(account_id).await?;
            let plan = loyalty::plan_discount(
                final_price,
                account.loyalty_points,
                account.tier,
                points_to_use,
            )?;
            account.loyalty_points = plan.remaining_points;
            account.updated_at = self.clock.now();
            match self.accounts.save(&account).await {
                Ok(saved) => return Ok((saved, plan)),
                Err(StoreError::StaleWrite { .. }) => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Err(DomainError::Conflict(format!("account {account_id} kept changing during discount"))
            .into())
    }

    async fn adjust_points(
        &self,
        account_id: &AccountId,
        delta: i64,
    ) -> Result<(), ApplicationError> {
        for _ in 0..self.max_write_attempts {
            let mut account = self.load_account(account_id).await?;
            account.loyalty_points += delta;
            account.updated_at = self.clock.now();
            match self.accounts.save(&account).await {
                Ok(_) => return Ok(()),
                Err(StoreError::StaleWrite { .. }) => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Err(DomainError::Conflict(format!("account {account_id} kept changing during refund"))
            .into())
    }

    /// Writes `plan` onto the quote, provided the price it was planned against
    /// still stands.
    async fn write_discount(
        &self,
        quote_id: &QuoteId,
        account_id: &AccountId,
        planned_price: Decimal,
        plan: &DiscountPlan,
    ) -> Result<Quote, ApplicationError> {
        for _ in 0..self.max_write_attempts {
            let mut quote = self.load(quote_id).await?;
            let final_price = discount_guard(&quote, account_id)?;
            if final_price != planned_price {
                return Err(DomainError::Conflict(format!(
                    "quote {quote_id} was repriced to {final_price} during discount"
                ))
                .into());
            }
            quote.discount_applied = plan.discount_amount;
            quote.loyalty_points_applied = plan.points_used;
            quote.updated_at = self.clock.now();
            match self.quotes.update(&quote).await {
                Ok(stored) => return Ok(stored),
                Err(StoreError::StaleWrite { .. }) => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Err(DomainError::Conflict(format!("quote {quote_id} kept changing during discount"))
            .into())
    }

    fn record_event(
        &self,
        ctx: &OperationContext,
        quote_id: &QuoteId,
        event_type: &str,
        category: AuditCategory,
        decorate: impl FnOnce(AuditEvent) -> AuditEvent,
    ) {
        let event = ctx
            .audit()
            .event(event_type, category, AuditOutcome::Success)
            .for_quote(quote_id)
            .at(self.clock.now());
        self.audit.emit(decorate(event));
    }
}

fn estimate_request(intake: &QuoteIntake) -> EstimateRequest {
    EstimateRequest {
        vehicle_class: intake.trip.vehicle_class,
        pickup: intake.trip.pickup_location.clone(),
        dropoff: intake.trip.dropoff_location.clone(),
        destination: intake.trip.destination.clone(),
        is_one_way: intake.trip.is_one_way,
    }
}

/// Preconditions for redeeming points on `quote`; returns the price to discount.
fn discount_guard(quote: &Quote, account_id: &AccountId) -> Result<Decimal, DomainError> {
    let event = LifecycleEvent::ApplyLoyaltyDiscount;
    if !quote.is_owned_by(account_id) {
        return Err(DomainError::Unauthorized(format!(
            "account {account_id} does not own quote {}",
            quote.id
        )));
    }
    if quote.status.is_terminal() {
        return Err(DomainError::Conflict(format!(
            "quote is {} and can no longer {}",
            quote.status.as_str(),
            event.as_str()
        )));
    }
    if quote.loyalty_points_applied > 0 {
        return Err(DomainError::Conflict(format!(
            "a loyalty discount was already applied to quote {}",
            quote.id
        )));
    }
    quote.final_price.ok_or_else(|| {
        DomainError::Validation(format!("a final price is required before {}", event.as_str()))
    })
}
