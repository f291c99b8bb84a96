use std::sync::Arc;

use eyre::{eyre, Result};
use serde_json::{Map, Value};
use tracing::info;

use crate::config::{BackendKind, Config};
use crate::db::SqliteStore;
use crate::error::DataAccessError;
use crate::models::{PotentialWallet, Transaction, TransactionRow, TXNS_TABLE, WALLETS_TABLE};
use crate::rest::RestStore;

/// What the aggregator needs from a backend
pub trait TransactionStore {
    /// Unprocessed transactions, oldest first
    fn fetch_unprocessed(&self) -> Result<Vec<TransactionRow>, DataAccessError>;

    /// Flip the processed flag for every id in one batch
    fn mark_processed(&self, ids: &[String]) -> Result<(), DataAccessError>;
}

/// Full data-sync surface of a backend
pub trait Backend: TransactionStore + Send + Sync {
    /// Insert or update by id. Never resets the processed flag of an existing row.
    fn upsert_transactions(&self, txns: &[Transaction]) -> Result<usize, DataAccessError>;

    /// Drop rows sharing a wallet address with `wallets`, then insert `wallets`
    fn replace_wallets(&self, wallets: &[PotentialWallet]) -> Result<usize, DataAccessError>;

    /// Read rows of a known table as JSON objects
    fn select_rows(
        &self,
        table: &str,
        columns: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Map<String, Value>>, DataAccessError>;
}

/// Columns each table exposes to `select_rows`
pub fn known_columns(table: &str) -> Result<&'static [&'static str], DataAccessError> {
    match table {
        TXNS_TABLE => Ok(&["id", "wallet", "token_address", "sol_value", "update_at", "is_print"]),
        WALLETS_TABLE => Ok(&["wallet", "attributes", "updated_at"]),
        other => Err(DataAccessError::UnknownTable(other.to_string())),
    }
}

/// Reject tables and columns the backends do not know about
pub fn check_selection(table: &str, columns: Option<&[String]>) -> Result<(), DataAccessError> {
    let known = known_columns(table)?;
    for column in columns.unwrap_or_default() {
        if !known.contains(&column.as_str()) {
            return Err(DataAccessError::UnknownColumn {
                table: table.to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

/// Open the configured backend; call once per process
pub fn connect(cfg: &Config) -> Result<Arc<dyn Backend>> {
    match cfg.backend {
        BackendKind::Sqlite => {
            info!("Using SQLite backend at {}", cfg.db_path);
            let store = SqliteStore::open(&cfg.db_path)?;
            Ok(Arc::new(store))
        }
        BackendKind::Supabase => {
            let (Some(url), Some(key)) = (&cfg.supabase_url, &cfg.supabase_key) else {
                return Err(eyre!("Supabase URL or API key is missing."));
            };
            info!("Using Supabase backend at {}", url);
            let store = RestStore::new(url, key, cfg.request_timeout_secs)?;
            Ok(Arc::new(store))
        }
    }
}
