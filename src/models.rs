// src/models.rs
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend table holding Dune transaction exports
pub const TXNS_TABLE: &str = "txns_dune";
/// Backend table holding candidate wallets
pub const WALLETS_TABLE: &str = "potential_wallets";

/// A transaction row exactly as a backend or CSV file hands it over.
/// Every field may be missing; `parser::validate` turns it into a `Transaction`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TransactionRow {
    pub id: Option<String>,
    pub wallet: Option<String>,
    pub token_address: Option<String>,
    #[serde(rename = "sol_value")]
    pub value: Option<String>,
    #[serde(rename = "update_at")]
    pub updated_at: Option<String>,
}

impl TransactionRow {
    /// Build a row from a JSON object, accepting numbers where text is expected
    pub fn from_json(obj: &Map<String, Value>) -> Self {
        let field = |name: &str| match obj.get(name) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        };

        Self {
            id: field("id"),
            wallet: field("wallet"),
            token_address: field("token_address"),
            value: field("sol_value"),
            updated_at: field("update_at"),
        }
    }
}

/// A validated transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: String,
    pub wallet: String,
    pub token_address: String,
    #[serde(rename = "sol_value")]
    pub value: Decimal,
    #[serde(rename = "update_at")]
    pub updated_at: DateTime<Utc>,
}

/// A candidate wallet; any extra CSV columns ride along as attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PotentialWallet {
    pub wallet: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

/// All pending transactions of one token
#[derive(Debug, Clone, Default)]
pub struct TokenGroup {
    pub transactions: Vec<Transaction>,
    pub total: Decimal,
    pub wallets: BTreeSet<String>,
    /// The sum ran past `Decimal::MAX`; `total` is pinned there
    pub saturated: bool,
}

impl TokenGroup {
    pub fn push(&mut self, txn: Transaction) {
        match self.total.checked_add(txn.value) {
            Some(total) => self.total = total,
            None => {
                self.total = Decimal::MAX;
                self.saturated = true;
            }
        }
        self.wallets.insert(txn.wallet.clone());
        self.transactions.push(txn);
    }

    pub fn distinct_wallets(&self) -> usize {
        self.wallets.len()
    }
}

/// A token group that crossed the alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenAlert {
    pub transactions: Vec<Transaction>,
    /// Rounded to 2 decimal places for display
    pub total_value: Decimal,
    /// Unrounded sum used for qualification
    pub exact_total: Decimal,
    pub distinct_wallets: usize,
    /// Totals are a lower bound when set
    pub saturated: bool,
}

impl From<TokenGroup> for TokenAlert {
    fn from(group: TokenGroup) -> Self {
        let distinct_wallets = group.distinct_wallets();
        Self {
            total_value: group.total.round_dp(2),
            exact_total: group.total,
            distinct_wallets,
            saturated: group.saturated,
            transactions: group.transactions,
        }
    }
}

/// Qualifying token groups keyed by token address
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AlertReport {
    pub tokens: BTreeMap<String, TokenAlert>,
}

impl AlertReport {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

impl fmt::Display for AlertReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (token, alert) in &self.tokens {
            let bound = if alert.saturated { ">= " } else { "" };
            writeln!(f, "Token: {} - Total Value: {}{}", token, bound, alert.total_value)?;
            writeln!(f, "  Distinct Wallets: {}", alert.distinct_wallets)?;
            for txn in &alert.transactions {
                writeln!(f, "  Wallet: {}, Value: {}", txn.wallet, txn.value.round_dp(2))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_from_json_accepts_numbers() {
        let obj = json!({
            "id": 42,
            "wallet": "A",
            "token_address": "tok1",
            "sol_value": 12.5,
            "update_at": "2024-11-18T14:39:57+00:00",
            "is_print": 0
        });
        let row = TransactionRow::from_json(obj.as_object().unwrap());

        assert_eq!(row.id.as_deref(), Some("42"));
        assert_eq!(row.value.as_deref(), Some("12.5"));
        assert_eq!(row.updated_at.as_deref(), Some("2024-11-18T14:39:57+00:00"));
    }

    #[test]
    fn null_fields_become_none() {
        let obj = json!({ "id": "1", "wallet": null });
        let row = TransactionRow::from_json(obj.as_object().unwrap());

        assert_eq!(row.wallet, None);
        assert_eq!(row.token_address, None);
    }

    #[test]
    fn alert_rounds_total_but_keeps_exact_sum() {
        let mut group = TokenGroup::default();
        for (id, wallet, value) in [("1", "A", "20.004"), ("2", "B", "30.003")] {
            group.push(Transaction {
                id: id.into(),
                wallet: wallet.into(),
                token_address: "tok".into(),
                value: value.parse().unwrap(),
                updated_at: Utc::now(),
            });
        }
        let alert = TokenAlert::from(group);

        assert_eq!(alert.exact_total, "50.007".parse::<Decimal>().unwrap());
        assert_eq!(alert.total_value, "50.01".parse::<Decimal>().unwrap());
        assert_eq!(alert.distinct_wallets, 2);
        assert!(!alert.saturated);
    }

    #[test]
    fn group_sum_saturates_instead_of_overflowing() {
        let mut group = TokenGroup::default();
        for id in ["1", "2"] {
            group.push(Transaction {
                id: id.into(),
                wallet: id.into(),
                token_address: "tok".into(),
                value: Decimal::MAX,
                updated_at: Utc::now(),
            });
        }

        assert_eq!(group.total, Decimal::MAX);
        assert!(group.saturated);
        assert_eq!(group.transactions.len(), 2);
    }
}
