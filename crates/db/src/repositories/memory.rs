use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use fleetquote_core::domain::account::{Account, AccountId, NewAccount};
use fleetquote_core::domain::quote::{Quote, QuoteFilter, QuoteId};
use fleetquote_core::errors::StoreError;
use fleetquote_core::ports::{AccountDirectory, QuoteStore};

use super::account::{normalize_email, open_account};

/// Versioned in-process quote store with the same write contract as the
/// SQLite repository.
#[derive(Default)]
pub struct InMemoryQuoteRepository {
    quotes: RwLock<HashMap<String, Quote>>,
}

#[async_trait]
impl QuoteStore for InMemoryQuoteRepository {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.get(&id.0).cloned())
    }

    async fn insert(&self, quote: &Quote) -> Result<(), StoreError> {
        let mut quotes = self.quotes.write().await;
        if quotes.contains_key(&quote.id.0) {
            return Err(StoreError::Duplicate { entity: "quote", key: quote.id.0.clone() });
        }
        quotes.insert(quote.id.0.clone(), quote.clone());
        Ok(())
    }

    async fn update(&self, quote: &Quote) -> Result<Quote, StoreError> {
        let mut quotes = self.quotes.write().await;
        match quotes.get_mut(&quote.id.0) {
            Some(current) if current.version == quote.version => {
                let mut stored = quote.clone();
                stored.version += 1;
                *current = stored.clone();
                Ok(stored)
            }
            _ => Err(StoreError::StaleWrite { entity: "quote", id: quote.id.0.clone() }),
        }
    }

    async fn delete(&self, id: &QuoteId) -> Result<bool, StoreError> {
        let mut quotes = self.quotes.write().await;
        Ok(quotes.remove(&id.0).is_some())
    }

    async fn list(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, StoreError> {
        let quotes = self.quotes.read().await;
        let mut matching: Vec<Quote> =
            quotes.values().filter(|quote| filter.matches(quote)).cloned().collect();
        matching.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.0.cmp(&left.id.0))
        });
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryAccountRepository {
    /// Seeds an account as-is, e.g. one carrying an existing balance.
    pub async fn put(&self, account: Account) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.id.0.clone(), account);
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountRepository {
    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&id.0).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let email = normalize_email(email);
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|account| normalize_email(&account.email) == email).cloned())
    }

    async fn create(&self, profile: NewAccount) -> Result<Account, StoreError> {
        let account = open_account(&profile);
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|existing| normalize_email(&existing.email) == account.email) {
            return Err(StoreError::Duplicate { entity: "account", key: account.email });
        }
        accounts.insert(account.id.0.clone(), account.clone());
        Ok(account)
    }

    async fn save(&self, account: &Account) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&account.id.0) {
            Some(current) if current.version == account.version => {
                let mut stored = account.clone();
                stored.version += 1;
                *current = stored.clone();
                Ok(stored)
            }
            _ => Err(StoreError::StaleWrite { entity: "account", id: account.id.0.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use secrecy::SecretString;

    use fleetquote_core::domain::account::NewAccount;
    use fleetquote_core::domain::quote::{BookingStatus, QuoteFilter};
    use fleetquote_core::errors::StoreError;
    use fleetquote_core::ports::{AccountDirectory, QuoteStore};

    use crate::repositories::test_support::sample_quote;
    use crate::repositories::{InMemoryAccountRepository, InMemoryQuoteRepository};

    #[tokio::test]
    async fn in_memory_quote_repo_round_trip() {
        let repo = InMemoryQuoteRepository::default();
        let quote = sample_quote(None);

        repo.insert(&quote).await.expect("save quote");
        let found = repo.find_by_id(&quote.id).await.expect("find quote");

        assert_eq!(found, Some(quote));
    }

    #[tokio::test]
    async fn in_memory_quote_update_is_conditional_on_version() {
        let repo = InMemoryQuoteRepository::default();
        let quote = sample_quote(None);
        repo.insert(&quote).await.expect("insert");

        let mut first = quote.clone();
        first.status = BookingStatus::Confirmed;
        let stored = repo.update(&first).await.expect("first writer wins");
        assert_eq!(stored.version, 1);

        let error = repo.update(&quote).await.expect_err("second writer is stale");
        assert!(matches!(error, StoreError::StaleWrite { .. }));

        repo.delete(&quote.id).await.expect("delete");
        let error = repo.update(&stored).await.expect_err("deleted record");
        assert!(matches!(error, StoreError::StaleWrite { .. }));
    }

    #[tokio::test]
    async fn in_memory_list_matches_sql_ordering() {
        let repo = InMemoryQuoteRepository::default();
        let older = sample_quote(None);
        let mut newer = sample_quote(None);
        newer.created_at = older.created_at + Duration::minutes(5);
        repo.insert(&older).await.expect("insert");
        repo.insert(&newer).await.expect("insert");

        let listed = repo.list(&QuoteFilter::default()).await.expect("list");
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[tokio::test]
    async fn in_memory_accounts_reject_duplicate_email() {
        let repo = InMemoryAccountRepository::default();
        let profile = |email: &str| NewAccount {
            name: "Sipho".to_string(),
            email: email.to_string(),
            phone: None,
            password: SecretString::from("long enough password".to_string()),
        };

        let account = repo.create(profile("sipho@example.com")).await.expect("create");
        assert!(repo.find_by_email("SIPHO@example.com").await.expect("find").is_some());

        let error = repo.create(profile(" Sipho@Example.com")).await.expect_err("duplicate");
        assert!(matches!(error, StoreError::Duplicate { entity: "account", .. }));

        let saved = repo.save(&account).await.expect("save");
        assert_eq!(saved.version, account.version + 1);
        assert!(repo.save(&account).await.is_err());
    }
}
