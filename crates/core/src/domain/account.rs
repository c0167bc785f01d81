use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl LoyaltyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bronze" => Some(Self::Bronze),
            "silver" => Some(Self::Silver),
            "gold" => Some(Self::Gold),
            "platinum" => Some(Self::Platinum),
            _ => None,
        }
    }
}

/// Customer account as seen by the engine. Owned by the user-management
/// collaborator; the engine only reads and increments the loyalty fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub version: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub loyalty_points: i64,
    pub total_trips: i64,
    pub total_spent: Decimal,
    pub tier: LoyaltyTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile handed to the account directory when a token holder registers.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: SecretString,
}

/// Registration details supplied alongside an anonymous accept. The email
/// address is always the one the quote link was sent to.
#[derive(Clone, Debug, Deserialize)]
pub struct RegistrationPayload {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub password: SecretString,
}

pub const MIN_PASSWORD_LEN: usize = 8;
