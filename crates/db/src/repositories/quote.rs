use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use fleetquote_core::domain::account::AccountId;
use fleetquote_core::domain::quote::{
    BookingStatus, ContactDetails, Quote, QuoteFilter, QuoteId, QuoteStatus, TripDetails,
};
use fleetquote_core::domain::vehicle::VehicleClass;
use fleetquote_core::errors::StoreError;
use fleetquote_core::ports::QuoteStore;
use fleetquote_core::tokens::ApprovalToken;

use super::{
    decode_decimal, decode_optional_timestamp, decode_timestamp, encode_timestamp,
    is_unique_violation, RepositoryError,
};
use crate::DbPool;

const QUOTE_COLUMNS: &str = "id, version, account_id, purpose, trip_type, pickup_location,
    dropoff_location, destination, vehicle_class, is_one_way, trip_date, trip_time,
    return_date, passengers, contact_name, contact_email, contact_phone, company,
    estimated_price, final_price, discount_applied, loyalty_points_earned,
    loyalty_points_applied, status, quote_status, approval_token, token_expires_at,
    admin_notes, booking_notes, created_at, sent_to_customer_at, confirmed_at, booked_at,
    completed_at, customer_responded_at, updated_at";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn decode_date(name: &str, raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

fn row_to_quote(row: &SqliteRow) -> Result<Quote, RepositoryError> {
    let vehicle_raw: String = column(row, "vehicle_class")?;
    let vehicle_class = VehicleClass::parse(&vehicle_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown vehicle class `{vehicle_raw}`")))?;
    let status_raw: String = column(row, "status")?;
    let status = BookingStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown booking status `{status_raw}`")))?;
    let quote_status_raw: String = column(row, "quote_status")?;
    let quote_status = QuoteStatus::parse(&quote_status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown quote status `{quote_status_raw}`"))
    })?;

    let trip_date: String = column(row, "trip_date")?;
    let trip_time: Option<String> = column(row, "trip_time")?;
    let trip_time = trip_time
        .map(|raw| {
            NaiveTime::parse_from_str(&raw, TIME_FORMAT)
                .map_err(|error| RepositoryError::Decode(format!("trip_time: {error}")))
        })
        .transpose()?;
    let return_date: Option<String> = column(row, "return_date")?;
    let passengers: Option<i64> = column(row, "passengers")?;
    let passengers = passengers
        .map(|value| {
            u32::try_from(value)
                .map_err(|_| RepositoryError::Decode(format!("passengers out of range: {value}")))
        })
        .transpose()?;

    let estimated_price: String = column(row, "estimated_price")?;
    let final_price: Option<String> = column(row, "final_price")?;
    let discount_applied: String = column(row, "discount_applied")?;
    let account_id: Option<String> = column(row, "account_id")?;
    let approval_token: Option<String> = column(row, "approval_token")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(Quote {
        id: QuoteId(column(row, "id")?),
        version: column(row, "version")?,
        trip: TripDetails {
            purpose: column(row, "purpose")?,
            trip_type: column(row, "trip_type")?,
            pickup_location: column(row, "pickup_location")?,
            dropoff_location: column(row, "dropoff_location")?,
            destination: column(row, "destination")?,
            vehicle_class,
            is_one_way: column(row, "is_one_way")?,
            trip_date: decode_date("trip_date", &trip_date)?,
            trip_time,
            return_date: return_date.map(|raw| decode_date("return_date", &raw)).transpose()?,
            passengers,
        },
        contact: ContactDetails {
            name: column(row, "contact_name")?,
            email: column(row, "contact_email")?,
            phone: column(row, "contact_phone")?,
            company: column(row, "company")?,
        },
        account_id: account_id.map(AccountId),
        estimated_price: decode_decimal("estimated_price", &estimated_price)?,
        final_price: final_price.map(|raw| decode_decimal("final_price", &raw)).transpose()?,
        discount_applied: decode_decimal("discount_applied", &discount_applied)?,
        loyalty_points_earned: column(row, "loyalty_points_earned")?,
        loyalty_points_applied: column(row, "loyalty_points_applied")?,
        status,
        quote_status,
        approval_token: approval_token.map(ApprovalToken::new),
        token_expires_at: decode_optional_timestamp(
            "token_expires_at",
            column(row, "token_expires_at")?,
        )?,
        admin_notes: column(row, "admin_notes")?,
        booking_notes: column(row, "booking_notes")?,
        created_at: decode_timestamp("created_at", &created_at)?,
        sent_to_customer_at: decode_optional_timestamp(
            "sent_to_customer_at",
            column(row, "sent_to_customer_at")?,
        )?,
        confirmed_at: decode_optional_timestamp("confirmed_at", column(row, "confirmed_at")?)?,
        booked_at: decode_optional_timestamp("booked_at", column(row, "booked_at")?)?,
        completed_at: decode_optional_timestamp("completed_at", column(row, "completed_at")?)?,
        customer_responded_at: decode_optional_timestamp(
            "customer_responded_at",
            column(row, "customer_responded_at")?,
        )?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl QuoteStore for SqlQuoteRepository {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_quote(r)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, quote: &Quote) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO quotes ({QUOTE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                     ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&quote.id.0)
        .bind(quote.version)
        .bind(quote.account_id.as_ref().map(|id| id.0.as_str()))
        .bind(&quote.trip.purpose)
        .bind(&quote.trip.trip_type)
        .bind(&quote.trip.pickup_location)
        .bind(&quote.trip.dropoff_location)
        .bind(&quote.trip.destination)
        .bind(quote.trip.vehicle_class.as_str())
        .bind(quote.trip.is_one_way)
        .bind(quote.trip.trip_date.format(DATE_FORMAT).to_string())
        .bind(quote.trip.trip_time.map(|time| time.format(TIME_FORMAT).to_string()))
        .bind(quote.trip.return_date.map(|date| date.format(DATE_FORMAT).to_string()))
        .bind(quote.trip.passengers.map(i64::from))
        .bind(&quote.contact.name)
        .bind(&quote.contact.email)
        .bind(&quote.contact.phone)
        .bind(&quote.contact.company)
        .bind(quote.estimated_price.to_string())
        .bind(quote.final_price.map(|price| price.to_string()))
        .bind(quote.discount_applied.to_string())
        .bind(quote.loyalty_points_earned)
        .bind(quote.loyalty_points_applied)
        .bind(quote.status.as_str())
        .bind(quote.quote_status.as_str())
        .bind(quote.approval_token.as_ref().map(ApprovalToken::as_str))
        .bind(quote.token_expires_at.map(encode_timestamp))
        .bind(&quote.admin_notes)
        .bind(&quote.booking_notes)
        .bind(encode_timestamp(quote.created_at))
        .bind(quote.sent_to_customer_at.map(encode_timestamp))
        .bind(quote.confirmed_at.map(encode_timestamp))
        .bind(quote.booked_at.map(encode_timestamp))
        .bind(quote.completed_at.map(encode_timestamp))
        .bind(quote.customer_responded_at.map(encode_timestamp))
        .bind(encode_timestamp(quote.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => {
                Err(StoreError::Duplicate { entity: "quote", key: quote.id.0.clone() })
            }
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }

    async fn update(&self, quote: &Quote) -> Result<Quote, StoreError> {
        let result = sqlx::query(
            "UPDATE quotes SET
                 version = version + 1,
                 account_id = ?,
                 final_price = ?,
                 discount_applied = ?,
                 loyalty_points_earned = ?,
                 loyalty_points_applied = ?,
                 status = ?,
                 quote_status = ?,
                 approval_token = ?,
                 token_expires_at = ?,
                 admin_notes = ?,
                 booking_notes = ?,
                 sent_to_customer_at = ?,
                 confirmed_at = ?,
                 booked_at = ?,
                 completed_at = ?,
                 customer_responded_at = ?,
                 updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(quote.account_id.as_ref().map(|id| id.0.as_str()))
        .bind(quote.final_price.map(|price| price.to_string()))
        .bind(quote.discount_applied.to_string())
        .bind(quote.loyalty_points_earned)
        .bind(quote.loyalty_points_applied)
        .bind(quote.status.as_str())
        .bind(quote.quote_status.as_str())
        .bind(quote.approval_token.as_ref().map(ApprovalToken::as_str))
        .bind(quote.token_expires_at.map(encode_timestamp))
        .bind(&quote.admin_notes)
        .bind(&quote.booking_notes)
        .bind(quote.sent_to_customer_at.map(encode_timestamp))
        .bind(quote.confirmed_at.map(encode_timestamp))
        .bind(quote.booked_at.map(encode_timestamp))
        .bind(quote.completed_at.map(encode_timestamp))
        .bind(quote.customer_responded_at.map(encode_timestamp))
        .bind(encode_timestamp(quote.updated_at))
        .bind(&quote.id.0)
        .bind(quote.version)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StaleWrite { entity: "quote", id: quote.id.0.clone() });
        }

        let mut stored = quote.clone();
        stored.version += 1;
        Ok(stored)
    }

    async fn delete(&self, id: &QuoteId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM quotes WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, StoreError> {
        let status = filter.status.map(|status| status.as_str());
        let quote_status = filter.quote_status.map(|status| status.as_str());
        let account_id = filter.account_id.as_ref().map(|id| id.0.as_str());

        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes
             WHERE (? IS NULL OR status = ?)
               AND (? IS NULL OR quote_status = ?)
               AND (? IS NULL OR account_id = ?)
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(status)
        .bind(status)
        .bind(quote_status)
        .bind(quote_status)
        .bind(account_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_quote).collect::<Result<Vec<_>, _>>()?)
    }
}
