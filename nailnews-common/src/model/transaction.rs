use crate::model::{Id, post::PostMarker, pricing::Cents, user::UserMarker};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct TransactionMarker;

/// Ledger entry. Charges are negative, credits positive.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id<TransactionMarker>,
    pub user: Id<UserMarker>,
    pub amount: Cents,
    pub description: String,
    pub post: Option<Id<PostMarker>>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct Wallet {
    pub balance: Cents,
    pub total_charged: Cents,
    pub transaction_count: usize,
}

impl Wallet {
    /// The displayed balance is the plain sum of the ledger.
    #[must_use]
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        Self {
            balance: transactions.iter().map(|transaction| transaction.amount).sum(),
            total_charged: -transactions
                .iter()
                .map(|transaction| transaction.amount)
                .filter(|amount| amount.0 < 0)
                .sum::<Cents>(),
            transaction_count: transactions.len(),
        }
    }
}

/// One month of `get_detailed_revenue_report`.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct RevenueReportRow {
    #[serde(with = "time::serde::rfc3339")]
    pub month: OffsetDateTime,
    pub charges: i64,
    pub revenue: Cents,
}
