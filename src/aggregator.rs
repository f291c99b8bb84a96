use std::collections::BTreeMap;

use tracing::{error, info};

use crate::config::Thresholds;
use crate::error::AlertError;
use crate::models::{AlertReport, TokenAlert, TokenGroup, Transaction, TransactionRow};
use crate::parser;
use crate::store::TransactionStore;

/// Group transactions by token, keeping each group in timestamp order
pub fn group_by_token(mut txns: Vec<Transaction>) -> BTreeMap<String, TokenGroup> {
    // stable: equal timestamps keep their fetch order
    txns.sort_by_key(|t| t.updated_at);

    let mut groups: BTreeMap<String, TokenGroup> = BTreeMap::new();
    for txn in txns {
        groups.entry(txn.token_address.clone()).or_default().push(txn);
    }
    groups
}

/// Validate, group and keep only the groups that cross the thresholds
pub fn evaluate(rows: Vec<TransactionRow>, thresholds: &Thresholds) -> BTreeMap<String, TokenAlert> {
    let (txns, skipped) = parser::validate_all(rows);
    if skipped > 0 {
        info!("Skipped {} malformed transactions", skipped);
    }

    group_by_token(txns)
        .into_iter()
        // compare the unrounded sum
        .filter(|(_, group)| thresholds.qualifies(group.total, group.distinct_wallets()))
        .map(|(token, group)| (token, TokenAlert::from(group)))
        .collect()
}

/// Same evaluation as `aggregate_and_flag`, without touching the processed flags
pub fn preview<S>(store: &S, thresholds: &Thresholds) -> Result<AlertReport, AlertError>
where
    S: TransactionStore + ?Sized,
{
    let rows = store.fetch_unprocessed().map_err(AlertError::Fetch)?;
    Ok(AlertReport {
        tokens: evaluate(rows, thresholds),
    })
}

/// Build the alert report from pending transactions and flag every reported transaction.
///
/// Groups are flagged one batch at a time, in token order. A group only enters the
/// report once its batch succeeded; the first failed batch aborts the run.
pub fn aggregate_and_flag<S>(store: &S, thresholds: &Thresholds) -> Result<AlertReport, AlertError>
where
    S: TransactionStore + ?Sized,
{
    let rows = store.fetch_unprocessed().map_err(AlertError::Fetch)?;
    info!("Fetched {} unprocessed transactions", rows.len());

    let candidates = evaluate(rows, thresholds);
    let tokens: Vec<String> = candidates.keys().cloned().collect();

    let mut report = AlertReport::default();
    for (idx, (token, alert)) in candidates.into_iter().enumerate() {
        let ids: Vec<String> = alert.transactions.iter().map(|t| t.id.clone()).collect();

        if let Err(source) = store.mark_processed(&ids) {
            error!("Flag update failed for token {}: {}", token, source);
            return Err(AlertError::FlagUpdate {
                flagged: report.tokens.keys().cloned().collect(),
                failed: token,
                unattempted: tokens[idx + 1..].to_vec(),
                source,
            });
        }

        info!(
            "🚨 {} crossed threshold: total {} over {} wallets ({} txns flagged)",
            token,
            alert.total_value,
            alert.distinct_wallets,
            ids.len()
        );
        report.tokens.insert(token, alert);
    }

    Ok(report)
}
