// src/parser.rs
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::{IngestError, MalformedRecord};
use crate::models::{PotentialWallet, Transaction, TransactionRow};

// Naive layouts are read as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parse the timestamp layouts seen in Dune exports and backend responses
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Dune: "2024-11-18 14:39:57.000 UTC"
    let naive = raw.strip_suffix(" UTC").unwrap_or(raw);
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

fn required(value: Option<String>, field: &'static str) -> Result<String, MalformedRecord> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(MalformedRecord::MissingField(field))
}

/// Validate a raw row into a `Transaction`
pub fn validate(row: TransactionRow) -> Result<Transaction, MalformedRecord> {
    let id = required(row.id, "id")?;
    let wallet = required(row.wallet, "wallet")?;
    let token_address = required(row.token_address, "token_address")?;

    let raw_value = required(row.value, "sol_value")?;
    let value = raw_value
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&raw_value))
        .map_err(|_| match raw_value.parse::<f64>() {
            // a well-formed number too large for a Decimal
            Ok(f) if f.is_finite() => MalformedRecord::ValueOverflow(raw_value.clone()),
            _ => MalformedRecord::InvalidNumber {
                field: "sol_value",
                value: raw_value.clone(),
            },
        })?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(MalformedRecord::NegativeValue(value));
    }

    let raw_ts = required(row.updated_at, "update_at")?;
    let updated_at = parse_timestamp(&raw_ts).ok_or(MalformedRecord::InvalidTimestamp(raw_ts))?;

    Ok(Transaction {
        id,
        wallet,
        token_address,
        value,
        updated_at,
    })
}

/// Validate every row, logging and dropping the malformed ones
pub fn validate_all(rows: Vec<TransactionRow>) -> (Vec<Transaction>, usize) {
    let mut valid = Vec::with_capacity(rows.len());
    let mut skipped = 0;

    for row in rows {
        let id = row.id.clone().unwrap_or_else(|| "<none>".to_string());
        match validate(row) {
            Ok(txn) => valid.push(txn),
            Err(e) => {
                warn!("Skipping malformed transaction {}: {}", id, e);
                skipped += 1;
            }
        }
    }

    (valid, skipped)
}

fn csv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, IngestError> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    Ok(reader)
}

/// Read a transaction export; returns the raw rows in file order
pub fn read_transactions(path: impl AsRef<Path>) -> Result<Vec<TransactionRow>, IngestError> {
    let mut reader = csv_reader(path.as_ref())?;

    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Read a wallet export. Rows without a wallet are skipped; a repeated wallet keeps its last row.
pub fn read_wallets(path: impl AsRef<Path>) -> Result<(Vec<PotentialWallet>, usize), IngestError> {
    let mut reader = csv_reader(path.as_ref())?;

    let headers = reader.headers()?.clone();
    let wallet_idx = headers
        .iter()
        .position(|h| h == "wallet")
        .ok_or(IngestError::MissingColumn("wallet"))?;

    let mut by_wallet: BTreeMap<String, PotentialWallet> = BTreeMap::new();
    let mut skipped = 0;

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let wallet = record.get(wallet_idx).unwrap_or_default().to_string();
        if wallet.is_empty() {
            warn!("Skipping wallet row {}: missing wallet", line + 1);
            skipped += 1;
            continue;
        }

        let attributes = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(i, (_, value))| *i != wallet_idx && !value.is_empty())
            .map(|(_, (name, value))| (name.to_string(), value.to_string()))
            .collect();

        by_wallet.insert(wallet.clone(), PotentialWallet { wallet, attributes });
    }

    Ok((by_wallet.into_values().collect(), skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn row(id: &str, wallet: &str, token: &str, value: &str, ts: &str) -> TransactionRow {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        TransactionRow {
            id: opt(id),
            wallet: opt(wallet),
            token_address: opt(token),
            value: opt(value),
            updated_at: opt(ts),
        }
    }

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_known_timestamp_layouts() {
        let expected = "2024-11-18T14:39:57Z".parse::<DateTime<Utc>>().unwrap();

        assert_eq!(parse_timestamp("2024-11-18T14:39:57+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-11-18 14:39:57.000 UTC"), Some(expected));
        assert_eq!(parse_timestamp("2024-11-18 14:39:57"), Some(expected));
        assert_eq!(parse_timestamp("2024-11-18T14:39:57"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn validates_complete_row() {
        let txn = validate(row("1", "A", "tok1", "20.5", "2024-11-18 14:39:57 UTC")).unwrap();

        assert_eq!(txn.id, "1");
        assert_eq!(txn.value, "20.5".parse::<Decimal>().unwrap());
    }

    #[test]
    fn rejects_malformed_rows() {
        let ts = "2024-11-18T14:39:57Z";

        assert_eq!(
            validate(row("1", "", "tok1", "1", ts)),
            Err(MalformedRecord::MissingField("wallet"))
        );
        assert!(matches!(
            validate(row("1", "A", "tok1", "abc", ts)),
            Err(MalformedRecord::InvalidNumber { .. })
        ));
        assert!(matches!(
            validate(row("1", "A", "tok1", "-3", ts)),
            Err(MalformedRecord::NegativeValue(_))
        ));
        assert_eq!(
            validate(row("1", "A", "tok1", "1e30", ts)),
            Err(MalformedRecord::ValueOverflow("1e30".to_string()))
        );
        assert!(matches!(
            validate(row("1", "A", "tok1", "3", "soon")),
            Err(MalformedRecord::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn validate_all_skips_bad_rows_and_keeps_going() {
        let ts = "2024-11-18T14:39:57Z";
        let (valid, skipped) = validate_all(vec![
            row("1", "A", "tok1", "10", ts),
            row("2", "B", "", "10", ts),
            row("3", "C", "tok1", "10", ts),
        ]);

        assert_eq!(skipped, 1);
        assert_eq!(valid.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), ["1", "3"]);
    }

    #[test]
    fn reads_transaction_csv_ignoring_extra_columns() {
        let file = write_csv(
            "id,wallet,token_address,sol_value,update_at,block\n\
             1, A ,tok1,20,2024-11-18 14:39:57.000 UTC,100\n\
             2,B,tok1,,2024-11-18 14:40:00.000 UTC,101\n",
        );

        let rows = read_transactions(file.path()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].wallet.as_deref(), Some("A"));
        assert!(validate(rows[1].clone()).is_err());
    }

    #[test]
    fn reads_wallet_csv_with_attributes_and_last_row_wins() {
        let file = write_csv(
            "wallet,label,score\n\
             W1,whale,10\n\
             ,orphan,1\n\
             W1,shark,\n\
             W2,fish,3\n",
        );

        let (wallets, skipped) = read_wallets(file.path()).unwrap();

        assert_eq!(skipped, 1);
        assert_eq!(wallets.len(), 2);
        assert_eq!(wallets[0].wallet, "W1");
        assert_eq!(wallets[0].attributes.get("label").map(String::as_str), Some("shark"));
        assert!(!wallets[0].attributes.contains_key("score"));
    }

    #[test]
    fn wallet_csv_requires_wallet_column() {
        let file = write_csv("address,label\nW1,x\n");

        assert!(matches!(read_wallets(file.path()), Err(IngestError::MissingColumn("wallet"))));
    }
}
