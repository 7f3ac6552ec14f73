//! Account state as seen by the risk engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FleetError;

pub type AccountId = i64;
pub type UserId = i64;

/// A rate-limited Telegram session owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Owner; selects which risk settings apply.
    pub user_id: UserId,
    pub phone: String,
    pub status: AccountStatus,
    pub consecutive_failures: u32,
    /// Only meaningful while `status == Cooling`.
    pub cooling_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Last status change; the warning sweep ages accounts by this.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: AccountId, user_id: UserId, phone: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            phone: phone.to_string(),
            status: AccountStatus::New,
            consecutive_failures: 0,
            cooling_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }
}

/// Account lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    New,
    Normal,
    Warning,
    Restricted,
    /// Two-way restricted: can only message contacts that wrote first.
    TwoWay,
    Cooling,
    Frozen,
    Dead,
    Maintenance,
}

impl AccountStatus {
    pub const ALL: [AccountStatus; 9] = [
        AccountStatus::New,
        AccountStatus::Normal,
        AccountStatus::Warning,
        AccountStatus::Restricted,
        AccountStatus::TwoWay,
        AccountStatus::Cooling,
        AccountStatus::Frozen,
        AccountStatus::Dead,
        AccountStatus::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::New => "new",
            AccountStatus::Normal => "normal",
            AccountStatus::Warning => "warning",
            AccountStatus::Restricted => "restricted",
            AccountStatus::TwoWay => "two_way",
            AccountStatus::Cooling => "cooling",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Dead => "dead",
            AccountStatus::Maintenance => "maintenance",
        }
    }

    /// No automatic recovery path exists for these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AccountStatus::Dead | AccountStatus::Frozen)
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| FleetError::Validation(format!("Unknown account status: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(AccountStatus::TwoWay.as_str(), "two_way");
        assert_eq!("cooling".parse::<AccountStatus>().unwrap(), AccountStatus::Cooling);
        assert!("zombie".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn test_terminal() {
        assert!(AccountStatus::Dead.is_terminal());
        assert!(AccountStatus::Frozen.is_terminal());
        assert!(!AccountStatus::Cooling.is_terminal());
        assert!(!AccountStatus::Restricted.is_terminal());
    }
}
