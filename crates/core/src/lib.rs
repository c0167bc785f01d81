pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod lifecycle;
pub mod loyalty;
pub mod ports;
pub mod pricing;
pub mod tokens;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
pub use domain::account::{Account, AccountId, LoyaltyTier, NewAccount, RegistrationPayload};
pub use domain::actor::Actor;
pub use domain::quote::{
    BookingStatus, ContactDetails, Quote, QuoteFilter, QuoteId, QuoteIntake, QuoteStatus,
    QuoteSummary, TripDetails,
};
pub use domain::vehicle::VehicleClass;
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError, StoreError};
pub use flows::{FlowEngine, LifecycleCommand, LifecycleEvent, QuoteLifecycleFlow, TransitionError};
pub use lifecycle::{
    DiscountReceipt, ManualBooking, OperationContext, QuoteLifecycleController, TokenCheckView,
};
pub use loyalty::{LoyaltySummary, TierBenefits};
pub use ports::{AccountDirectory, Clock, Notifier, QuoteStore, SystemClock};
pub use pricing::{EstimateRequest, PriceEstimate, PricingEngine, RateCard};
pub use tokens::{ApprovalToken, ApprovalTokenIssuer, IssuedToken};
