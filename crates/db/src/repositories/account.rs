use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as ArgonHasher, PasswordVerifier,
        SaltString,
    },
    Argon2,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use fleetquote_core::domain::account::{Account, AccountId, LoyaltyTier, NewAccount};
use fleetquote_core::errors::StoreError;
use fleetquote_core::ports::AccountDirectory;

use super::{decode_decimal, decode_timestamp, encode_timestamp, is_unique_violation, RepositoryError};
use crate::DbPool;

const ACCOUNT_COLUMNS: &str = "id, version, name, email, phone, loyalty_points, total_trips,
    total_spent, tier, created_at, updated_at";

/// Argon2id hashing for passwords collected at registration.
#[derive(Clone, Debug, Default)]
pub struct PasswordHasher;

impl PasswordHasher {
    pub fn hash_password(&self, password: &str) -> Result<String, RepositoryError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| RepositoryError::Hashing(e.to_string()))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, RepositoryError> {
        let parsed = PasswordHash::new(hash).map_err(|e| RepositoryError::Hashing(e.to_string()))?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(RepositoryError::Hashing(e.to_string())),
        }
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub(crate) fn open_account(profile: &NewAccount) -> Account {
    let now = Utc::now();
    Account {
        id: AccountId(uuid::Uuid::new_v4().to_string()),
        version: 0,
        name: profile.name.trim().to_string(),
        email: normalize_email(&profile.email),
        phone: profile.phone.clone().filter(|phone| !phone.trim().is_empty()),
        loyalty_points: 0,
        total_trips: 0,
        total_spent: Decimal::ZERO,
        tier: LoyaltyTier::Bronze,
        created_at: now,
        updated_at: now,
    }
}

pub struct SqlAccountRepository {
    pool: DbPool,
    hasher: PasswordHasher,
}

impl SqlAccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, hasher: PasswordHasher }
    }

    pub async fn password_hash(&self, id: &AccountId) -> Result<Option<String>, StoreError> {
        let hash = sqlx::query_scalar::<_, String>("SELECT password_hash FROM accounts WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(hash)
    }
}

fn row_to_account(row: &SqliteRow) -> Result<Account, RepositoryError> {
    let tier_raw: String =
        row.try_get("tier").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tier = LoyaltyTier::parse(&tier_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown loyalty tier `{tier_raw}`")))?;
    let total_spent: String =
        row.try_get("total_spent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Account {
        id: AccountId(row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?),
        version: row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        name: row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        email: row.try_get("email").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        phone: row.try_get("phone").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        loyalty_points: row
            .try_get("loyalty_points")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        total_trips: row
            .try_get("total_trips")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        total_spent: decode_decimal("total_spent", &total_spent)?,
        tier,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl AccountDirectory for SqlAccountRepository {
    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_account(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?"))
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_account(r)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, profile: NewAccount) -> Result<Account, StoreError> {
        let account = open_account(&profile);
        let password_hash = self.hasher.hash_password(profile.password.expose_secret())?;

        let result = sqlx::query(
            "INSERT INTO accounts (id, version, name, email, phone, password_hash, loyalty_points,
                                   total_trips, total_spent, tier, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&account.id.0)
        .bind(account.version)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.phone)
        .bind(&password_hash)
        .bind(account.loyalty_points)
        .bind(account.total_trips)
        .bind(account.total_spent.to_string())
        .bind(account.tier.as_str())
        .bind(encode_timestamp(account.created_at))
        .bind(encode_timestamp(account.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(account),
            Err(error) if is_unique_violation(&error) => {
                Err(StoreError::Duplicate { entity: "account", key: account.email })
            }
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }

    async fn save(&self, account: &Account) -> Result<Account, StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET
                 version = version + 1,
                 name = ?,
                 phone = ?,
                 loyalty_points = ?,
                 total_trips = ?,
                 total_spent = ?,
                 tier = ?,
                 updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&account.name)
        .bind(&account.phone)
        .bind(account.loyalty_points)
        .bind(account.total_trips)
        .bind(account.total_spent.to_string())
        .bind(account.tier.as_str())
        .bind(encode_timestamp(account.updated_at))
        .bind(&account.id.0)
        .bind(account.version)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StaleWrite { entity: "account", id: account.id.0.clone() });
        }

        let mut stored = account.clone();
        stored.version += 1;
        Ok(stored)
    }
}
