use std::collections::HashMap;
use std::path::Path;

use eyre::{Result, WrapErr};
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{Transaction, TXNS_TABLE, WALLETS_TABLE};
use crate::parser;
use crate::store::Backend;

/// Outcome of pushing one CSV file into the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub read: usize,
    pub skipped: usize,
    /// Rows superseded by a later row with the same id
    pub duplicates: usize,
    pub written: usize,
}

/// Keep the last row per id, in the order ids first appear.
/// PostgREST refuses an upsert batch that touches the same row twice.
pub fn dedup_by_id(txns: Vec<Transaction>) -> (Vec<Transaction>, usize) {
    let mut slot: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Transaction> = Vec::with_capacity(txns.len());
    let mut duplicates = 0;

    for txn in txns {
        match slot.get(&txn.id) {
            Some(&idx) => {
                unique[idx] = txn;
                duplicates += 1;
            }
            None => {
                slot.insert(txn.id.clone(), unique.len());
                unique.push(txn);
            }
        }
    }

    (unique, duplicates)
}

/// Upsert a Dune transaction export. Existing rows keep their processed flag.
pub fn upload_transactions(backend: &dyn Backend, path: impl AsRef<Path>) -> Result<UploadSummary> {
    let path = path.as_ref();
    let rows = parser::read_transactions(path)
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    let read = rows.len();

    let (txns, skipped) = parser::validate_all(rows);
    let (txns, duplicates) = dedup_by_id(txns);
    if duplicates > 0 {
        warn!("{} rows repeat an earlier id; the last one wins", duplicates);
    }
    let written = backend.upsert_transactions(&txns)?;

    info!("💾 Upserted {} of {} rows into {} ({} skipped)", written, read, TXNS_TABLE, skipped);
    Ok(UploadSummary {
        read,
        skipped,
        duplicates,
        written,
    })
}

/// Replace candidate wallets: rows sharing a wallet address are dropped first
pub fn upload_wallets(backend: &dyn Backend, path: impl AsRef<Path>) -> Result<UploadSummary> {
    let path = path.as_ref();
    let (wallets, skipped) = parser::read_wallets(path)
        .wrap_err_with(|| format!("reading {}", path.display()))?;

    let written = backend.replace_wallets(&wallets)?;

    info!("💾 Replaced {} wallets in {} ({} skipped)", written, WALLETS_TABLE, skipped);
    Ok(UploadSummary {
        read: wallets.len() + skipped,
        skipped,
        duplicates: 0,
        written,
    })
}
