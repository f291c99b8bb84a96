use std::sync::{Mutex, MutexGuard};

use chrono::SecondsFormat;
use eyre::Result;
use rusqlite::{params, params_from_iter, types::ValueRef, Connection};
use serde_json::{Map, Value};

use crate::error::DataAccessError;
use crate::models::{PotentialWallet, Transaction, TransactionRow, TXNS_TABLE, WALLETS_TABLE};
use crate::store::{self, Backend, TransactionStore};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS txns_dune (
  id            TEXT PRIMARY KEY,
  wallet        TEXT,
  token_address TEXT,
  sol_value     TEXT, -- Decimal stored as string
  update_at     TEXT, -- RFC3339, UTC
  is_print      INTEGER NOT NULL DEFAULT 0 CHECK (is_print IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_txns_dune_pending ON txns_dune (is_print, update_at);

CREATE TABLE IF NOT EXISTS potential_wallets (
  wallet     TEXT PRIMARY KEY,
  attributes TEXT NOT NULL DEFAULT '{}', -- JSON object
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

/// SQLite-backed store; the connection is shared behind a mutex
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = connect(path)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DataAccessError> {
        self.conn.lock().map_err(|_| DataAccessError::LockPoisoned)
    }
}

impl TransactionStore for SqliteStore {
    fn fetch_unprocessed(&self) -> Result<Vec<TransactionRow>, DataAccessError> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT id, wallet, token_address, sol_value, update_at
             FROM txns_dune
             WHERE is_print = 0
             ORDER BY update_at ASC",
        )?;

        let rows = stmt.query_map([], |r| {
            Ok(TransactionRow {
                id: r.get(0)?,
                wallet: r.get(1)?,
                token_address: r.get(2)?,
                value: r.get(3)?,
                updated_at: r.get(4)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn mark_processed(&self, ids: &[String]) -> Result<(), DataAccessError> {
        let mut db = self.lock()?;

        // one batch commits or fails as a whole
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE txns_dune SET is_print = 1 WHERE id = ?1")?;
            for id in ids {
                stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl Backend for SqliteStore {
    fn upsert_transactions(&self, txns: &[Transaction]) -> Result<usize, DataAccessError> {
        let mut db = self.lock()?;

        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO txns_dune (id, wallet, token_address, sol_value, update_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    wallet        = excluded.wallet,
                    token_address = excluded.token_address,
                    sol_value     = excluded.sol_value,
                    update_at     = excluded.update_at
                "#,
            )?;
            for txn in txns {
                stmt.execute(params![
                    txn.id,
                    txn.wallet,
                    txn.token_address,
                    txn.value.to_string(),
                    txn.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                ])?;
            }
        }
        tx.commit()?;
        Ok(txns.len())
    }

    fn replace_wallets(&self, wallets: &[PotentialWallet]) -> Result<usize, DataAccessError> {
        let mut db = self.lock()?;

        let tx = db.transaction()?;
        {
            let mut delete = tx.prepare("DELETE FROM potential_wallets WHERE wallet = ?1")?;
            for w in wallets {
                delete.execute([&w.wallet])?;
            }

            let mut insert = tx.prepare(
                "INSERT INTO potential_wallets (wallet, attributes, updated_at)
                 VALUES (?1, ?2, datetime('now'))",
            )?;
            for w in wallets {
                insert.execute(params![w.wallet, serde_json::to_string(&w.attributes)?])?;
            }
        }
        tx.commit()?;
        Ok(wallets.len())
    }

    fn select_rows(
        &self,
        table: &str,
        columns: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Map<String, Value>>, DataAccessError> {
        store::check_selection(table, columns)?;

        // identifiers are whitelisted above
        let projection = match columns {
            Some(cols) if !cols.is_empty() => cols.join(", "),
            _ => store::known_columns(table)?.join(", "),
        };
        let order = if table == TXNS_TABLE { "update_at" } else { "wallet" };
        let sql = format!("SELECT {projection} FROM {table} ORDER BY {order} LIMIT ?1");

        // SQLite treats a negative LIMIT as unlimited
        let limit = limit.map(|n| n as i64).unwrap_or(-1);

        let db = self.lock()?;
        let mut stmt = db.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt.query_map(params_from_iter([limit]), |r| {
            let mut obj = Map::new();
            for (i, name) in names.iter().enumerate() {
                obj.insert(name.clone(), column_to_json(table, name, r.get_ref(i)?));
            }
            Ok(obj)
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn column_to_json(table: &str, name: &str, value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if table == WALLETS_TABLE && name == "attributes" {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            }
        }
        ValueRef::Blob(bytes) => Value::from(bytes.to_vec()),
    }
}
