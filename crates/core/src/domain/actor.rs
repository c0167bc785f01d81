use serde::{Deserialize, Serialize};

use crate::domain::account::AccountId;

/// Who is driving a lifecycle operation. Authentication happens upstream;
/// the engine only decides what each kind of actor may do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "account_id", rename_all = "snake_case")]
pub enum Actor {
    Admin,
    Customer(AccountId),
    Anonymous,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    pub fn label(&self) -> String {
        match self {
            Self::Admin => "admin".to_owned(),
            Self::Customer(account_id) => format!("customer:{}", account_id.0),
            Self::Anonymous => "anonymous".to_owned(),
        }
    }
}
