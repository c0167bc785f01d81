use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;

use fleetquote_core::audit::InMemoryAuditSink;
use fleetquote_core::domain::account::{
    Account, AccountId, LoyaltyTier, NewAccount, RegistrationPayload,
};
use fleetquote_core::domain::actor::Actor;
use fleetquote_core::domain::quote::{
    BookingStatus, ContactDetails, Quote, QuoteFilter, QuoteId, QuoteIntake, QuoteStatus,
    TripDetails,
};
use fleetquote_core::domain::vehicle::VehicleClass;
use fleetquote_core::errors::{ApplicationError, DomainError, ErrorKind, StoreError};
use fleetquote_core::flows::QuoteOutcome;
use fleetquote_core::lifecycle::{ManualBooking, OperationContext, QuoteLifecycleController};
use fleetquote_core::ports::{
    AccountDirectory, Clock, ManualClock, Notifier, QuoteStore, RecordingNotifier, SentNotification,
};
use fleetquote_db::{InMemoryAccountRepository, InMemoryQuoteRepository};

struct Harness {
    controller: QuoteLifecycleController,
    quotes: Arc<dyn QuoteStore>,
    accounts: Arc<InMemoryAccountRepository>,
    account_faults: Arc<FlakyAccountDirectory>,
    notifier: RecordingNotifier,
    clock: ManualClock,
    audit: InMemoryAuditSink,
}

fn harness() -> Harness {
    harness_with(Arc::new(InMemoryQuoteRepository::default()), RecordingNotifier::default())
}

fn harness_with(quotes: Arc<dyn QuoteStore>, notifier: RecordingNotifier) -> Harness {
    let accounts = Arc::new(InMemoryAccountRepository::default());
    let account_faults = Arc::new(FlakyAccountDirectory {
        inner: accounts.clone(),
        fail_saves: AtomicBool::new(false),
    });
    let clock = ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).single().expect("valid timestamp"),
    );
    let audit = InMemoryAuditSink::default();
    let notifier_port: Arc<dyn Notifier> = Arc::new(notifier.clone());
    let controller =
        QuoteLifecycleController::new(quotes.clone(), account_faults.clone(), notifier_port)
        .with_clock(Arc::new(clock.clone()))
        .with_audit_sink(Arc::new(audit.clone()));
    Harness { controller, quotes, accounts, account_faults, notifier, clock, audit }
}

fn admin() -> OperationContext {
    OperationContext::new(Actor::Admin, "req-admin")
}

fn anonymous() -> OperationContext {
    OperationContext::new(Actor::Anonymous, "req-link")
}

fn customer(account_id: &AccountId) -> OperationContext {
    OperationContext::new(Actor::Customer(account_id.clone()), "req-customer")
}

fn intake(vehicle_class: VehicleClass) -> QuoteIntake {
    QuoteIntake {
        trip: TripDetails {
            purpose: "Airport transfer".to_string(),
            trip_type: "transfer".to_string(),
            pickup_location: "Sandton".to_string(),
            dropoff_location: "OR Tambo".to_string(),
            destination: "OR Tambo International".to_string(),
            vehicle_class,
            is_one_way: false,
            trip_date: NaiveDate::from_ymd_opt(2026, 11, 20).expect("valid date"),
            trip_time: None,
            return_date: None,
            passengers: Some(3),
        },
        contact: ContactDetails {
            name: "Thandi Mokoena".to_string(),
            email: "thandi@example.com".to_string(),
            phone: "+27 82 555 0101".to_string(),
            company: None,
        },
        account_id: None,
    }
}

fn account(id: &str, points: i64, tier: LoyaltyTier) -> Account {
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid timestamp");
    Account {
        id: AccountId(id.to_string()),
        version: 0,
        name: "Regular Rider".to_string(),
        email: format!("{id}@example.com"),
        phone: None,
        loyalty_points: points,
        total_trips: 0,
        total_spent: Decimal::ZERO,
        tier,
        created_at: now,
        updated_at: now,
    }
}

fn registration(password: &str) -> RegistrationPayload {
    RegistrationPayload {
        name: None,
        phone: None,
        password: SecretString::from(password.to_string()),
    }
}

fn kind(result: Result<impl std::fmt::Debug, ApplicationError>) -> ErrorKind {
    result.expect_err("operation should fail").kind()
}

async fn stored(harness: &Harness, id: &QuoteId) -> Quote {
    harness.quotes.find_by_id(id).await.expect("find").expect("quote exists")
}

/// Creates an anonymous quote and sends it for 1200, returning it with its link token.
async fn sent_to_email(harness: &Harness) -> (Quote, String) {
    let quote = harness
        .controller
        .create_quote(&anonymous(), intake(VehicleClass::Sedan4))
        .await
        .expect("create");
    let sent = harness
        .controller
        .price_and_send(&admin(), &quote.id, Decimal::from(1200), None)
        .await
        .expect("send");
    let token = sent.approval_token.as_ref().expect("token minted").as_str().to_string();
    (sent, token)
}

#[tokio::test]
async fn anonymous_request_is_estimated_and_waits_for_admin() {
    let harness = harness();
    let quote = harness
        .controller
        .create_quote(&anonymous(), intake(VehicleClass::Sedan4))
        .await
        .expect("create");

    assert_eq!(quote.estimated_price, Decimal::from(1800));
    assert_eq!(quote.quote_status, QuoteStatus::PendingAdmin);
    assert_eq!(quote.status, BookingStatus::Pending);
    assert!(quote.account_id.is_none());
    assert_eq!(stored(&harness, &quote.id).await, quote);
    assert_eq!(harness.audit.events_of_type("quote.created").len(), 1);
}

#[tokio::test]
async fn signed_in_customer_owns_the_quote_they_request() {
    let harness = harness();
    let owner = AccountId("acct-owner".to_string());
    let mut request = intake(VehicleClass::Sedan4);
    request.account_id = Some(AccountId("someone-else".to_string()));

    let quote = harness.controller.create_quote(&customer(&owner), request).await.expect("create");
    assert_eq!(quote.account_id, Some(owner.clone()));

    let mine = harness.controller.list_quotes_for_account(&customer(&owner)).await.expect("list");
    assert_eq!(mine.len(), 1);
    let listed = harness.controller.list_quotes(&customer(&owner), &QuoteFilter::default()).await;
    assert_eq!(kind(listed), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn admin_cannot_assign_a_quote_to_an_unknown_account() {
    let harness = harness();
    let mut request = intake(VehicleClass::Sedan4);
    request.account_id = Some(AccountId("acct-ghost".to_string()));

    let result = harness.controller.create_quote(&admin(), request.clone()).await;
    assert_eq!(kind(result), ErrorKind::Validation);
    let booking = ManualBooking { intake: request.clone(), final_price: None, notes: None };
    let result = harness.controller.create_manual_booking(&admin(), booking).await;
    assert_eq!(kind(result), ErrorKind::Validation);
    let all = harness.controller.list_quotes(&admin(), &QuoteFilter::default()).await.expect("list");
    assert!(all.is_empty());

    harness.accounts.put(account("acct-ghost", 0, LoyaltyTier::Bronze)).await;
    let quote = harness.controller.create_quote(&admin(), request).await.expect("create");
    assert_eq!(quote.account_id, Some(AccountId("acct-ghost".to_string())));
    assert_eq!(quote.quote_status, QuoteStatus::PendingAdmin);
}

#[tokio::test]
async fn invalid_intake_is_rejected_without_a_record() {
    let harness = harness();
    let mut request = intake(VehicleClass::Sedan4);
    request.contact.email = "not-an-email".to_string();

    let result = harness.controller.create_quote(&anonymous(), request).await;
    assert_eq!(kind(result), ErrorKind::Validation);
    let all = harness.controller.list_quotes(&admin(), &QuoteFilter::default()).await.expect("list");
    assert!(all.is_empty());
}

#[tokio::test]
async fn pricing_for_unregistered_contact_sends_a_seven_day_link() {
    let harness = harness();
    let (sent, token) = sent_to_email(&harness).await;

    assert_eq!(sent.quote_status, QuoteStatus::PendingEmail);
    assert_eq!(sent.status, BookingStatus::Pending);
    assert_eq!(sent.final_price, Some(Decimal::from(1200)));
    assert_eq!(sent.token_expires_at, Some(harness.clock.now() + Duration::days(7)));
    assert_eq!(sent.sent_to_customer_at, Some(harness.clock.now()));

    assert_eq!(
        harness.notifier.sent(),
        vec![SentNotification::QuoteReady {
            quote_id: sent.id.clone(),
            email: "thandi@example.com".to_string(),
            final_price: Decimal::from(1200),
            notes: None,
            token: Some(token),
        }]
    );
}

#[tokio::test]
async fn pricing_for_registered_customer_needs_no_link() {
    let harness = harness();
    let owner = AccountId("acct-1".to_string());
    let quote = harness
        .controller
        .create_quote(&customer(&owner), intake(VehicleClass::Suv7))
        .await
        .expect("create");

    let sent = harness
        .controller
        .price_and_send(&admin(), &quote.id, Decimal::from(2500), Some("incl. tolls".to_string()))
        .await
        .expect("send");

    assert_eq!(sent.quote_status, QuoteStatus::PendingCustomer);
    assert!(sent.approval_token.is_none());
    assert!(matches!(
        harness.notifier.sent().as_slice(),
        [SentNotification::QuoteReady { token: None, notes: Some(notes), .. }] if notes == "incl. tolls"
    ));

    let stranger = AccountId("acct-2".to_string());
    let result = harness.controller.customer_accept(&customer(&stranger), &quote.id).await;
    assert_eq!(kind(result), ErrorKind::Unauthorized);

    let accepted =
        harness.controller.customer_accept(&customer(&owner), &quote.id).await.expect("accept");
    assert_eq!(accepted.quote_status, QuoteStatus::Accepted);
    assert_eq!(accepted.status, BookingStatus::Booked);
}

#[tokio::test]
async fn only_admins_price_quotes() {
    let harness = harness();
    let quote = harness
        .controller
        .create_quote(&anonymous(), intake(VehicleClass::Sedan4))
        .await
        .expect("create");

    let result =
        harness.controller.price_and_send(&anonymous(), &quote.id, Decimal::from(900), None).await;
    assert_eq!(kind(result), ErrorKind::Unauthorized);
    assert_eq!(stored(&harness, &quote.id).await, quote);
    assert!(!harness.audit.events_of_type("quote.transition_rejected").is_empty());
}

#[tokio::test]
async fn expired_link_is_refused_and_changes_nothing() {
    let harness = harness();
    let (sent, token) = sent_to_email(&harness).await;

    harness.clock.advance(Duration::days(7) + Duration::seconds(1));
    let result = harness.controller.anonymous_accept(&anonymous(), &sent.id, &token).await;
    assert_eq!(kind(result), ErrorKind::InvalidToken);

    let after = stored(&harness, &sent.id).await;
    assert_eq!(after, sent);
    assert_eq!(after.quote_status, QuoteStatus::PendingEmail);
}

#[tokio::test]
async fn link_check_is_read_only_and_accept_consumes_the_token() {
    let harness = harness();
    let (sent, token) = sent_to_email(&harness).await;

    let view = harness.controller.anonymous_check_token(&sent.id, &token).await.expect("check");
    assert!(view.requires_registration);
    assert!(!view.email_registered);
    assert_eq!(view.quote.final_price, Some(Decimal::from(1200)));
    assert_eq!(stored(&harness, &sent.id).await, sent);

    let wrong = harness.controller.anonymous_check_token(&sent.id, "not-the-token").await;
    assert_eq!(kind(wrong), ErrorKind::InvalidToken);

    let accepted =
        harness.controller.anonymous_accept(&anonymous(), &sent.id, &token).await.expect("accept");
    assert_eq!(accepted.quote_status, QuoteStatus::Accepted);
    assert_eq!(accepted.status, BookingStatus::Booked);
    assert!(accepted.approval_token.is_none());
    assert!(accepted.token_expires_at.is_none());

    let reused = harness.controller.anonymous_accept(&anonymous(), &sent.id, &token).await;
    assert_eq!(kind(reused), ErrorKind::InvalidToken);
    let declined = harness.controller.anonymous_decline(&anonymous(), &sent.id, &token, None).await;
    assert_eq!(kind(declined), ErrorKind::InvalidToken);

    assert!(matches!(
        harness.notifier.sent().last(),
        Some(SentNotification::Outcome { outcome: QuoteOutcome::Accepted, .. })
    ));
}

#[tokio::test]
async fn anonymous_decline_cancels_and_keeps_the_reason() {
    let harness = harness();
    let (sent, token) = sent_to_email(&harness).await;

    let declined = harness
        .controller
        .anonymous_decline(&anonymous(), &sent.id, &token, Some("Found a cheaper option".to_string()))
        .await
        .expect("decline");

    assert_eq!(declined.quote_status, QuoteStatus::Declined);
    assert_eq!(declined.status, BookingStatus::Cancelled);
    assert!(declined.admin_notes.as_deref().is_some_and(|notes| notes.contains("cheaper option")));
}

#[tokio::test]
async fn accepting_with_registration_links_a_new_account() {
    let harness = harness();
    let (sent, token) = sent_to_email(&harness).await;

    let (accepted, account) = harness
        .controller
        .anonymous_accept_with_registration(
            &anonymous(),
            &sent.id,
            &token,
            registration("long enough secret"),
        )
        .await
        .expect("accept with registration");

    assert_eq!(account.email, "thandi@example.com");
    assert_eq!(account.name, "Thandi Mokoena");
    assert_eq!(accepted.account_id, Some(account.id.clone()));
    assert_eq!(accepted.quote_status, QuoteStatus::Accepted);
    assert!(accepted.approval_token.is_none());

    let owned =
        harness.controller.list_quotes_for_account(&customer(&account.id)).await.expect("list");
    assert_eq!(owned.len(), 1);
}

#[tokio::test]
async fn registration_conflict_leaves_the_quote_untouched() {
    let harness = harness();
    let (sent, token) = sent_to_email(&harness).await;
    harness
        .accounts
        .create(NewAccount {
            name: "Thandi".to_string(),
            email: "Thandi@Example.com".to_string(),
            phone: None,
            password: SecretString::from("existing password".to_string()),
        })
        .await
        .expect("existing account");

    let view = harness.controller.anonymous_check_token(&sent.id, &token).await.expect("check");
    assert!(view.email_registered);

    let result = harness
        .controller
        .anonymous_accept_with_registration(
            &anonymous(),
            &sent.id,
            &token,
            registration("long enough secret"),
        )
        .await;
    assert_eq!(kind(result), ErrorKind::Conflict);

    let short = harness
        .controller
        .anonymous_accept_with_registration(&anonymous(), &sent.id, &token, registration("short"))
        .await;
    assert_eq!(kind(short), ErrorKind::Validation);

    assert_eq!(stored(&harness, &sent.id).await, sent);
}

#[tokio::test]
async fn completing_a_trip_awards_points_exactly_once() {
    let harness = harness();
    let owner = harness
        .accounts
        .create(NewAccount {
            name: "Coach Client".to_string(),
            email: "coach@example.com".to_string(),
            phone: None,
            password: SecretString::from("long enough secret".to_string()),
        })
        .await
        .expect("account");
    let quote = harness
        .controller
        .create_quote(&customer(&owner.id), intake(VehicleClass::LuxuryCoach22))
        .await
        .expect("create");

    let completed = harness
        .controller
        .set_status(&admin(), &quote.id, BookingStatus::Completed, Some(Decimal::from(2000)), None)
        .await
        .expect("complete");
    assert_eq!(completed.loyalty_points_earned, Some(500));
    assert_eq!(completed.quote_status, QuoteStatus::Converted);
    assert!(completed.completed_at.is_some());

    let credited = harness.accounts.find_by_id(&owner.id).await.expect("find").expect("account");
    assert_eq!(credited.loyalty_points, 500);
    assert_eq!(credited.total_trips, 1);
    assert_eq!(credited.total_spent, Decimal::from(2000));

    let again = harness
        .controller
        .set_status(&admin(), &quote.id, BookingStatus::Completed, None, None)
        .await
        .expect("repeat completion is a no-op");
    assert_eq!(again.version, completed.version);

    let reopened =
        harness.controller.set_status(&admin(), &quote.id, BookingStatus::Confirmed, None, None).await;
    assert_eq!(kind(reopened), ErrorKind::Conflict);

    let unchanged = harness.accounts.find_by_id(&owner.id).await.expect("find").expect("account");
    assert_eq!(unchanged.loyalty_points, 500);
    assert_eq!(unchanged.total_trips, 1);

    let summary = harness.controller.loyalty_summary(&customer(&owner.id)).await.expect("summary");
    assert_eq!(summary.loyalty_points, 500);
    assert_eq!(summary.redeemable_discount, Decimal::from(50));
}

#[tokio::test]
async fn failed_award_credit_releases_the_claim_for_a_retry() {
    let harness = harness();
    harness.accounts.put(account("acct-coach", 0, LoyaltyTier::Bronze)).await;
    let owner = AccountId("acct-coach".to_string());
    let quote = harness
        .controller
        .create_quote(&customer(&owner), intake(VehicleClass::LuxuryCoach22))
        .await
        .expect("create");

    harness.account_faults.fail_saves.store(true, Ordering::SeqCst);
    let failed = harness
        .controller
        .set_status(&admin(), &quote.id, BookingStatus::Completed, Some(Decimal::from(2000)), None)
        .await;
    assert_eq!(kind(failed), ErrorKind::Unavailable);

    let released = stored(&harness, &quote.id).await;
    assert_eq!(released.status, BookingStatus::Completed);
    assert_eq!(released.loyalty_points_earned, None);
    let untouched = harness.accounts.find_by_id(&owner).await.expect("find").expect("account");
    assert_eq!(untouched.loyalty_points, 0);
    assert_eq!(untouched.total_trips, 0);
    assert_eq!(harness.audit.events_of_type("loyalty.award_released").len(), 1);

    harness.account_faults.fail_saves.store(false, Ordering::SeqCst);
    let retried = harness
        .controller
        .set_status(&admin(), &quote.id, BookingStatus::Completed, None, None)
        .await
        .expect("retry completion");
    assert_eq!(retried.loyalty_points_earned, Some(500));

    let credited = harness.accounts.find_by_id(&owner).await.expect("find").expect("account");
    assert_eq!(credited.loyalty_points, 500);
    assert_eq!(credited.total_trips, 1);

    let again = harness
        .controller
        .set_status(&admin(), &quote.id, BookingStatus::Completed, None, None)
        .await
        .expect("repeat completion is a no-op");
    assert_eq!(again.version, retried.version);
    let settled = harness.accounts.find_by_id(&owner).await.expect("find").expect("account");
    assert_eq!(settled.loyalty_points, 500);
}

#[tokio::test]
async fn completion_without_an_account_awards_nothing() {
    let harness = harness();
    let quote = harness
        .controller
        .create_quote(&anonymous(), intake(VehicleClass::Sedan4))
        .await
        .expect("create");

    let completed = harness
        .controller
        .set_status(&admin(), &quote.id, BookingStatus::Completed, Some(Decimal::from(1500)), None)
        .await
        .expect("complete");
    assert_eq!(completed.loyalty_points_earned, None);
}

#[tokio::test]
async fn loyalty_discount_debits_points_once() {
    let harness = harness();
    harness.accounts.put(account("acct-silver", 1000, LoyaltyTier::Silver)).await;
    let owner = AccountId("acct-silver".to_string());
    let quote = harness
        .controller
        .create_quote(&customer(&owner), intake(VehicleClass::Sedan4))
        .await
        .expect("create");

    let unpriced = harness.controller.apply_loyalty_discount(&customer(&owner), &quote.id, 300).await;
    assert_eq!(kind(unpriced), ErrorKind::Validation);

    harness
        .controller
        .price_and_send(&admin(), &quote.id, Decimal::from(2000), None)
        .await
        .expect("send");

    let too_many =
        harness.controller.apply_loyalty_discount(&customer(&owner), &quote.id, 5000).await;
    assert!(matches!(
        too_many,
        Err(ApplicationError::Domain(DomainError::InsufficientPoints { requested: 5000, available: 1000 }))
    ));

    let receipt = harness
        .controller
        .apply_loyalty_discount(&customer(&owner), &quote.id, 350)
        .await
        .expect("discount");
    assert_eq!(receipt.points_used, 300);
    assert_eq!(receipt.points_discount, Decimal::from(30));
    assert_eq!(receipt.tier_discount, Decimal::from(100));
    assert_eq!(receipt.discount_amount, Decimal::from(130));
    assert_eq!(receipt.remaining_points, 700);

    let discounted = stored(&harness, &quote.id).await;
    assert_eq!(discounted.discount_applied, Decimal::from(130));
    assert_eq!(discounted.loyalty_points_applied, 300);

    let twice = harness.controller.apply_loyalty_discount(&customer(&owner), &quote.id, 100).await;
    assert_eq!(kind(twice), ErrorKind::Conflict);
    let balance = harness.accounts.find_by_id(&owner).await.expect("find").expect("account");
    assert_eq!(balance.loyalty_points, 700);
}

#[tokio::test]
async fn failed_discount_write_refunds_the_points() {
    let store = Arc::new(FlakyQuoteStore::default());
    let harness = harness_with(store.clone(), RecordingNotifier::default());
    harness.accounts.put(account("acct-gold", 800, LoyaltyTier::Gold)).await;
    let owner = AccountId("acct-gold".to_string());
    let quote = harness
        .controller
        .create_quote(&customer(&owner), intake(VehicleClass::Sedan4))
        .await
        .expect("create");
    harness
        .controller
        .price_and_send(&admin(), &quote.id, Decimal::from(1000), None)
        .await
        .expect("send");

    store.fail_updates.store(true, Ordering::SeqCst);
    let result = harness.controller.apply_loyalty_discount(&customer(&owner), &quote.id, 500).await;
    assert_eq!(kind(result), ErrorKind::Unavailable);

    let balance = harness.accounts.find_by_id(&owner).await.expect("find").expect("account");
    assert_eq!(balance.loyalty_points, 800);
    assert_eq!(stored(&harness, &quote.id).await.discount_applied, Decimal::ZERO);
}

#[tokio::test]
async fn repricing_during_discount_is_a_conflict_and_refunds() {
    let store = Arc::new(FlakyQuoteStore::default());
    let harness = harness_with(store.clone(), RecordingNotifier::default());
    harness.accounts.put(account("acct-silver", 1000, LoyaltyTier::Silver)).await;
    let owner = AccountId("acct-silver".to_string());
    let quote = harness
        .controller
        .create_quote(&customer(&owner), intake(VehicleClass::Sedan4))
        .await
        .expect("create");
    harness
        .controller
        .price_and_send(&admin(), &quote.id, Decimal::from(1200), None)
        .await
        .expect("send");

    *store.reprice_to.lock().expect("lock") = Some(Decimal::from(100));
    let result = harness.controller.apply_loyalty_discount(&customer(&owner), &quote.id, 300).await;
    assert_eq!(kind(result), ErrorKind::Conflict);

    let repriced = stored(&harness, &quote.id).await;
    assert_eq!(repriced.final_price, Some(Decimal::from(100)));
    assert_eq!(repriced.discount_applied, Decimal::ZERO);
    assert_eq!(repriced.loyalty_points_applied, 0);
    let balance = harness.accounts.find_by_id(&owner).await.expect("find").expect("account");
    assert_eq!(balance.loyalty_points, 1000);
    assert_eq!(harness.audit.events_of_type("loyalty.discount_rejected").len(), 1);
}

#[tokio::test]
async fn notification_failure_keeps_the_transition() {
    let harness = harness_with(
        Arc::new(InMemoryQuoteRepository::default()),
        RecordingNotifier::failing(),
    );
    let (sent, _) = sent_to_email(&harness).await;

    assert_eq!(stored(&harness, &sent.id).await.quote_status, QuoteStatus::PendingEmail);
    assert_eq!(harness.notifier.sent().len(), 1);
}

#[tokio::test]
async fn concurrent_writer_is_retried_until_attempts_run_out() {
    let store = Arc::new(FlakyQuoteStore::default());
    let harness = harness_with(store.clone(), RecordingNotifier::default());
    let first = harness
        .controller
        .create_quote(&anonymous(), intake(VehicleClass::Sedan4))
        .await
        .expect("create");

    store.interfere.store(1, Ordering::SeqCst);
    let sent = harness
        .controller
        .price_and_send(&admin(), &first.id, Decimal::from(1200), None)
        .await
        .expect("second attempt wins");
    assert_eq!(sent.quote_status, QuoteStatus::PendingEmail);
    assert_eq!(harness.notifier.sent().len(), 1);

    let second = harness
        .controller
        .create_quote(&anonymous(), intake(VehicleClass::Sedan4))
        .await
        .expect("create");
    store.interfere.store(10, Ordering::SeqCst);
    let result = harness.controller.price_and_send(&admin(), &second.id, Decimal::from(1200), None).await;
    assert_eq!(kind(result), ErrorKind::Conflict);
    assert_eq!(stored(&harness, &second.id).await.quote_status, QuoteStatus::PendingAdmin);
}

#[tokio::test]
async fn manual_booking_defaults_to_the_estimate() {
    let harness = harness();
    let booking = ManualBooking { intake: intake(VehicleClass::Sedan4), final_price: None, notes: None };

    let refused = harness.controller.create_manual_booking(&anonymous(), booking.clone()).await;
    assert_eq!(kind(refused), ErrorKind::Unauthorized);

    let booked = harness.controller.create_manual_booking(&admin(), booking).await.expect("book");
    assert_eq!(booked.final_price, Some(Decimal::from(1800)));
    assert_eq!(booked.status, BookingStatus::Booked);
    assert_eq!(booked.quote_status, QuoteStatus::Converted);
}

#[tokio::test]
async fn convert_to_booking_revokes_an_outstanding_link() {
    let harness = harness();
    let (sent, token) = sent_to_email(&harness).await;

    let converted = harness
        .controller
        .convert_to_booking(&admin(), &sent.id, Decimal::from(1100), Some(" phoned in ".to_string()))
        .await
        .expect("convert");
    assert_eq!(converted.status, BookingStatus::Booked);
    assert_eq!(converted.booking_notes.as_deref(), Some("phoned in"));

    let result = harness.controller.anonymous_accept(&anonymous(), &sent.id, &token).await;
    assert_eq!(kind(result), ErrorKind::InvalidToken);
}

#[tokio::test]
async fn delete_is_admin_only_and_reports_missing_quotes() {
    let harness = harness();
    let owner = AccountId("acct-9".to_string());
    let quote = harness
        .controller
        .create_quote(&customer(&owner), intake(VehicleClass::Sedan4))
        .await
        .expect("create");

    let refused = harness.controller.delete_quote(&customer(&owner), &quote.id).await;
    assert_eq!(kind(refused), ErrorKind::Unauthorized);

    harness.controller.delete_quote(&admin(), &quote.id).await.expect("delete");
    let missing = harness.controller.delete_quote(&admin(), &quote.id).await;
    assert_eq!(kind(missing), ErrorKind::NotFound);
    let gone = harness.controller.get_quote(&admin(), &quote.id).await;
    assert_eq!(kind(gone), ErrorKind::NotFound);
}

/// Wraps the in-memory store to inject concurrent writers and backend failures.
#[derive(Default)]
struct FlakyQuoteStore {
    inner: InMemoryQuoteRepository,
    interfere: AtomicU32,
    fail_updates: AtomicBool,
    reprice_to: Mutex<Option<Decimal>>,
}

#[async_trait]
impl QuoteStore for FlakyQuoteStore {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn insert(&self, quote: &Quote) -> Result<(), StoreError> {
        self.inner.insert(quote).await
    }

    async fn update(&self, quote: &Quote) -> Result<Quote, StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk I/O error".to_string()));
        }
        let reprice = self.reprice_to.lock().expect("lock").take();
        if let Some(price) = reprice {
            if let Some(mut current) = self.inner.find_by_id(&quote.id).await? {
                current.final_price = Some(price);
                self.inner.update(&current).await?;
            }
        }
        let pending = self.interfere.load(Ordering::SeqCst);
        if pending > 0 {
            self.interfere.store(pending - 1, Ordering::SeqCst);
            if let Some(current) = self.inner.find_by_id(&quote.id).await? {
                self.inner.update(&current).await?;
            }
        }
        self.inner.update(quote).await
    }

    async fn delete(&self, id: &QuoteId) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn list(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, StoreError> {
        self.inner.list(filter).await
    }
}

/// Account directory whose saves can be switched to fail with a backend error.
struct FlakyAccountDirectory {
    inner: Arc<InMemoryAccountRepository>,
    fail_saves: AtomicBool,
}

#[async_trait]
impl AccountDirectory for FlakyAccountDirectory {
    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.inner.find_by_email(email).await
    }

    async fn create(&self, profile: NewAccount) -> Result<Account, StoreError> {
        self.inner.create(profile).await
    }

    async fn save(&self, account: &Account) -> Result<Account, StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.save(account).await
    }
}
