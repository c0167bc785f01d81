//! Single-use approval tokens for customers acting on a quote without a session.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

pub const TOKEN_BYTES: usize = 32;
pub const TOKEN_TTL_DAYS: i64 = 7;

/// Secret value handed out in accept/decline links. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApprovalToken(String);

impl ApprovalToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact comparison that does not short-circuit on the first differing byte.
    pub fn matches(&self, supplied: &str) -> bool {
        let stored = self.0.as_bytes();
        let supplied = supplied.as_bytes();
        if stored.len() != supplied.len() {
            return false;
        }
        let mut diff: u8 = 0;
        for (left, right) in stored.iter().zip(supplied) {
            diff |= left ^ right;
        }
        diff == 0
    }
}

impl fmt::Debug for ApprovalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApprovalToken([redacted])")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: ApprovalToken,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenCheck {
    Valid,
    Invalid,
}

impl TokenCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ApprovalTokenIssuer {
    ttl: Duration,
}

impl Default for ApprovalTokenIssuer {
    fn default() -> Self {
        Self { ttl: Duration::days(TOKEN_TTL_DAYS) }
    }
}

impl ApprovalTokenIssuer {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn issue(&self, now: DateTime<Utc>) -> IssuedToken {
        self.issue_with(&mut rand::thread_rng(), now)
    }

    pub fn issue_with<R: RngCore>(&self, rng: &mut R, now: DateTime<Utc>) -> IssuedToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        rng.fill_bytes(&mut bytes);
        IssuedToken { token: ApprovalToken(hex_encode(&bytes)), expires_at: now + self.ttl }
    }

    /// Valid only for an exact match strictly before expiry. Missing stored
    /// fields mean the token was never issued or has already been consumed.
    pub fn validate(
        &self,
        stored: Option<&ApprovalToken>,
        stored_expiry: Option<DateTime<Utc>>,
        supplied: &str,
        now: DateTime<Utc>,
    ) -> TokenCheck {
        match (stored, stored_expiry) {
            (Some(stored), Some(expires_at)) if stored.matches(supplied) && now < expires_at => {
                TokenCheck::Valid
            }
            _ => TokenCheck::Invalid,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
