use rust_decimal::Decimal;

/// Failure talking to the backend
#[derive(Debug, thiserror::Error)]
pub enum DataAccessError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("database connection lock poisoned")]
    LockPoisoned,
}

/// A single record that cannot be used; it is skipped, never fatal
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedRecord {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid number `{value}` in field `{field}`")]
    InvalidNumber { field: &'static str, value: String },

    #[error("value `{0}` is outside the supported decimal range")]
    ValueOverflow(String),

    #[error("negative value {0}")]
    NegativeValue(Decimal),

    #[error("unrecognised timestamp `{0}`")]
    InvalidTimestamp(String),
}

/// Aggregation run failure
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("failed to fetch unprocessed transactions: {0}")]
    Fetch(#[source] DataAccessError),

    #[error(
        "failed to flag transactions for token {failed} (flagged: {flagged:?}, not attempted: {unattempted:?}): {source}"
    )]
    FlagUpdate {
        flagged: Vec<String>,
        failed: String,
        unattempted: Vec<String>,
        #[source]
        source: DataAccessError,
    },
}

/// CSV ingestion failure
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV Parsing Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV file has no `{0}` column")]
    MissingColumn(&'static str),
}
