use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::account::AccountId;
use crate::domain::vehicle::VehicleClass;
use crate::errors::DomainError;
use crate::tokens::ApprovalToken;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for QuoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse, customer-facing booking state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Booked,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Booked => "booked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "booked" => Some(Self::Booked),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Fine-grained approval workflow state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    PendingAdmin,
    PendingCustomer,
    PendingEmail,
    Accepted,
    Declined,
    Converted,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingAdmin => "pending_admin",
            Self::PendingCustomer => "pending_customer",
            Self::PendingEmail => "pending_email",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Converted => "converted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_admin" => Some(Self::PendingAdmin),
            "pending_customer" => Some(Self::PendingCustomer),
            "pending_email" => Some(Self::PendingEmail),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            "converted" => Some(Self::Converted),
            _ => None,
        }
    }

    pub fn awaits_customer(&self) -> bool {
        matches!(self, Self::PendingCustomer | Self::PendingEmail)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripDetails {
    pub purpose: String,
    pub trip_type: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub destination: String,
    pub vehicle_class: VehicleClass,
    pub is_one_way: bool,
    pub trip_date: NaiveDate,
    pub trip_time: Option<NaiveTime>,
    pub return_date: Option<NaiveDate>,
    pub passengers: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: Option<String>,
}

/// Everything intake needs to open a quote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteIntake {
    pub trip: TripDetails,
    pub contact: ContactDetails,
    pub account_id: Option<AccountId>,
}

impl QuoteIntake {
    pub fn validate(&self) -> Result<(), DomainError> {
        let required = [
            ("purpose", &self.trip.purpose),
            ("trip_type", &self.trip.trip_type),
            ("pickup_location", &self.trip.pickup_location),
            ("dropoff_location", &self.trip.dropoff_location),
            ("destination", &self.trip.destination),
            ("name", &self.contact.name),
            ("email", &self.contact.email),
            ("phone", &self.contact.phone),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();
        if !missing.is_empty() {
            return Err(DomainError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        if !self.contact.email.contains('@') {
            return Err(DomainError::Validation(format!(
                "`{}` is not a valid email address",
                self.contact.email.trim()
            )));
        }

        if let Some(return_date) = self.trip.return_date {
            if return_date < self.trip.trip_date {
                return Err(DomainError::Validation(
                    "return_date may not precede trip_date".to_owned(),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    /// Optimistic concurrency counter, bumped by every successful write.
    pub version: i64,
    pub trip: TripDetails,
    pub contact: ContactDetails,
    pub account_id: Option<AccountId>,
    pub estimated_price: Decimal,
    pub final_price: Option<Decimal>,
    pub discount_applied: Decimal,
    pub loyalty_points_earned: Option<i64>,
    pub loyalty_points_applied: i64,
    pub status: BookingStatus,
    pub quote_status: QuoteStatus,
    #[serde(skip)]
    pub approval_token: Option<ApprovalToken>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
    pub booking_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_to_customer_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub booked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub customer_responded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    /// Opens a fresh quote at `pending_admin` / `pending`.
    pub fn open(intake: QuoteIntake, estimated_price: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: QuoteId::generate(),
            version: 0,
            trip: intake.trip,
            contact: intake.contact,
            account_id: intake.account_id,
            estimated_price,
            final_price: None,
            discount_applied: Decimal::ZERO,
            loyalty_points_earned: None,
            loyalty_points_applied: 0,
            status: BookingStatus::Pending,
            quote_status: QuoteStatus::PendingAdmin,
            approval_token: None,
            token_expires_at: None,
            admin_notes: None,
            booking_notes: None,
            created_at: now,
            sent_to_customer_at: None,
            confirmed_at: None,
            booked_at: None,
            completed_at: None,
            customer_responded_at: None,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, account_id: &AccountId) -> bool {
        self.account_id.as_ref() == Some(account_id)
    }

    pub fn clear_approval_token(&mut self) {
        self.approval_token = None;
        self.token_expires_at = None;
    }

    pub fn append_admin_note(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() {
            return;
        }
        self.admin_notes = Some(match self.admin_notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
            _ => note.to_owned(),
        });
    }

    pub fn summary(&self) -> QuoteSummary {
        QuoteSummary {
            id: self.id.clone(),
            customer_name: self.contact.name.clone(),
            vehicle_class: self.trip.vehicle_class,
            pickup_location: self.trip.pickup_location.clone(),
            dropoff_location: self.trip.dropoff_location.clone(),
            destination: self.trip.destination.clone(),
            is_one_way: self.trip.is_one_way,
            trip_date: self.trip.trip_date,
            final_price: self.final_price,
            status: self.status,
            quote_status: self.quote_status,
            token_expires_at: self.token_expires_at,
        }
    }
}

/// Read-only view shown to an anonymous token holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSummary {
    pub id: QuoteId,
    pub customer_name: String,
    pub vehicle_class: VehicleClass,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub destination: String,
    pub is_one_way: bool,
    pub trip_date: NaiveDate,
    pub final_price: Option<Decimal>,
    pub status: BookingStatus,
    pub quote_status: QuoteStatus,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteFilter {
    pub status: Option<BookingStatus>,
    pub quote_status: Option<QuoteStatus>,
    pub account_id: Option<AccountId>,
}

impl QuoteFilter {
    pub fn matches(&self, quote: &Quote) -> bool {
        self.status.map_or(true, |status| quote.status == status)
            && self.quote_status.map_or(true, |quote_status| quote.quote_status == quote_status)
            && self.account_id.as_ref().map_or(true, |account_id| quote.is_owned_by(account_id))
    }
}
