// src/rest.rs
use std::time::Duration;

use eyre::Result;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::DataAccessError;
use crate::models::{PotentialWallet, Transaction, TransactionRow, TXNS_TABLE, WALLETS_TABLE};
use crate::store::{self, Backend, TransactionStore};

const PENDING_COLUMNS: &str = "id,wallet,token_address,sol_value,update_at,is_print";

/// Hosted backend spoken to over PostgREST (Supabase)
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct TransactionBody<'a> {
    id: &'a str,
    wallet: &'a str,
    token_address: &'a str,
    sol_value: String,
    update_at: String,
}

impl RestStore {
    pub fn new(url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn send(&self, builder: RequestBuilder) -> Result<Response, DataAccessError> {
        let resp = self.request(builder).send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(DataAccessError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    fn fetch_objects(&self, builder: RequestBuilder) -> Result<Vec<Map<String, Value>>, DataAccessError> {
        let text = self.send(builder)?.text()?;
        debug!("Raw response: {}", text);
        let rows: Vec<Map<String, Value>> = serde_json::from_str(&text)?;
        Ok(rows)
    }

    fn upsert<T: Serialize>(&self, table: &str, records: &[T]) -> Result<(), DataAccessError> {
        self.send(
            self.client
                .post(self.table_url(table))
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(records),
        )?;
        Ok(())
    }
}

/// PostgREST `in.(...)` filter with every value quoted
pub fn in_filter(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

impl TransactionStore for RestStore {
    fn fetch_unprocessed(&self) -> Result<Vec<TransactionRow>, DataAccessError> {
        info!("📡 Fetching unprocessed rows from {}", TXNS_TABLE);
        let rows = self.fetch_objects(self.client.get(self.table_url(TXNS_TABLE)).query(&[
            ("select", PENDING_COLUMNS),
            ("is_print", "eq.0"),
            ("order", "update_at.asc"),
        ]))?;
        Ok(rows.iter().map(TransactionRow::from_json).collect())
    }

    fn mark_processed(&self, ids: &[String]) -> Result<(), DataAccessError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.send(
            self.client
                .patch(self.table_url(TXNS_TABLE))
                .query(&[("id", in_filter(ids))])
                .header("Prefer", "return=minimal")
                .json(&json!({ "is_print": 1 })),
        )?;
        Ok(())
    }
}

impl Backend for RestStore {
    fn upsert_transactions(&self, txns: &[Transaction]) -> Result<usize, DataAccessError> {
        if txns.is_empty() {
            return Ok(0);
        }
        let body: Vec<TransactionBody<'_>> = txns
            .iter()
            .map(|t| TransactionBody {
                id: &t.id,
                wallet: &t.wallet,
                token_address: &t.token_address,
                sol_value: t.value.to_string(),
                update_at: t.updated_at.to_rfc3339(),
            })
            .collect();
        self.upsert(TXNS_TABLE, &body)?;
        Ok(txns.len())
    }

    fn replace_wallets(&self, wallets: &[PotentialWallet]) -> Result<usize, DataAccessError> {
        if wallets.is_empty() {
            return Ok(0);
        }
        let addresses: Vec<String> = wallets.iter().map(|w| w.wallet.clone()).collect();
        self.send(
            self.client
                .delete(self.table_url(WALLETS_TABLE))
                .query(&[("wallet", in_filter(&addresses))]),
        )?;
        self.upsert(WALLETS_TABLE, wallets)?;
        Ok(wallets.len())
    }

    fn select_rows(
        &self,
        table: &str,
        columns: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Map<String, Value>>, DataAccessError> {
        store::known_columns(table)?;

        // hosted tables may carry extra columns, so only the table is checked here
        let select = match columns {
            Some(cols) if !cols.is_empty() => cols.join(","),
            _ => "*".to_string(),
        };
        let mut query = vec![("select", select)];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        self.fetch_objects(self.client.get(self.table_url(table)).query(&query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::RawQuery,
        http::{HeaderMap, StatusCode},
        routing::get,
        Json, Router,
    };
    use std::net::SocketAddr;
    use std::sync::{mpsc, Arc, Mutex};

    /// Serve `router` on an ephemeral port from its own runtime thread
    fn spawn_backend(router: Router) -> String {
        let (tx, rx) = mpsc::channel::<SocketAddr>();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, router.into_make_service()).await.unwrap();
            });
        });
        format!("http://{}", rx.recv().unwrap())
    }

    #[derive(Default)]
    struct Seen {
        query: Option<String>,
        apikey: Option<String>,
    }

    fn pending_backend(seen: Arc<Mutex<Seen>>) -> Router {
        Router::new().route(
            "/rest/v1/txns_dune",
            get(move |RawQuery(query): RawQuery, headers: HeaderMap| {
                let seen = Arc::clone(&seen);
                async move {
                    let mut seen = seen.lock().unwrap();
                    seen.query = query;
                    seen.apikey = headers
                        .get("apikey")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    Json(json!([{
                        "id": 7,
                        "wallet": "A",
                        "token_address": "tok1",
                        "sol_value": 20.5,
                        "update_at": "2024-11-18T14:00:00+00:00",
                        "is_print": 0
                    }]))
                }
            })
            .patch(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "flag update refused") }),
        )
    }

    #[test]
    fn fetch_unprocessed_filters_and_orders_pending_rows() {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let url = spawn_backend(pending_backend(Arc::clone(&seen)));
        let store = RestStore::new(&url, "secret", 5).unwrap();

        let rows = store.fetch_unprocessed().unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id.as_deref(), Some("7"));
        assert_eq!(rows[0].value.as_deref(), Some("20.5"));

        let seen = seen.lock().unwrap();
        let query = seen.query.clone().unwrap_or_default();
        assert!(query.contains("is_print=eq.0"), "query was {query}");
        assert!(query.contains("order=update_at.asc"), "query was {query}");
        assert_eq!(seen.apikey.as_deref(), Some("secret"));
    }

    #[test]
    fn failed_flag_update_surfaces_status() {
        let url = spawn_backend(pending_backend(Arc::new(Mutex::new(Seen::default()))));
        let store = RestStore::new(&url, "secret", 5).unwrap();

        let err = store.mark_processed(&["7".to_string()]).unwrap_err();

        match err {
            DataAccessError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "flag update refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failed_fetch_surfaces_status() {
        let url = spawn_backend(Router::new().route(
            "/rest/v1/txns_dune",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ));
        let store = RestStore::new(&url, "secret", 5).unwrap();

        assert!(matches!(
            store.fetch_unprocessed(),
            Err(DataAccessError::Status { status: 503, .. })
        ));
    }

    #[test]
    fn empty_flag_batch_skips_the_request() {
        // nothing listens here; a request would fail
        let store = RestStore::new("http://127.0.0.1:9", "secret", 1).unwrap();

        assert!(store.mark_processed(&[]).is_ok());
    }

    #[test]
    fn in_filter_quotes_values() {
        let ids = vec!["1".to_string(), "a,b".to_string(), "q\"x".to_string()];
        assert_eq!(in_filter(&ids), r#"in.("1","a,b","q\"x")"#);
    }

    #[test]
    fn table_url_strips_trailing_slash() {
        let store = RestStore::new("https://x.supabase.co/", "k", 5).unwrap();
        assert_eq!(store.table_url(TXNS_TABLE), "https://x.supabase.co/rest/v1/txns_dune");
    }
}
