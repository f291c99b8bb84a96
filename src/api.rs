use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{net::SocketAddr, sync::Arc};
use tokio::task;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::aggregator;
use crate::config::Thresholds;
use crate::models::{AlertReport, TXNS_TABLE, WALLETS_TABLE};
use crate::store::{Backend, TransactionStore};

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub thresholds: Thresholds,
}

#[derive(Deserialize)]
pub struct TransactionQuery {
    pub pending: Option<bool>,
    pub limit: Option<usize>, // defaults to 100
}

#[derive(Deserialize)]
pub struct WalletQuery {
    pub limit: Option<usize>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "dune-alert-sync API running" }))
        .route("/transactions", get(list_transactions))
        .route("/wallets", get(list_wallets))
        .route("/alerts/preview", get(preview_alerts))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> eyre::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

// ---------- store calls (spawn_blocking) ----------

async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(Json(value)),
        Ok(Err(e)) => {
            error!("API store call failed: {}", e);
            Err((StatusCode::BAD_GATEWAY, e))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(q): Query<TransactionQuery>,
) -> ApiResult<Vec<Value>> {
    let limit = q.limit.unwrap_or(100);
    blocking(move || {
        if q.pending.unwrap_or(false) {
            let rows = state.backend.fetch_unprocessed().map_err(|e| e.to_string())?;
            rows.into_iter()
                .take(limit)
                .map(|r| serde_json::to_value(r).map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()
        } else {
            let rows = state
                .backend
                .select_rows(TXNS_TABLE, None, Some(limit))
                .map_err(|e| e.to_string())?;
            Ok(rows.into_iter().map(Value::Object).collect())
        }
    })
    .await
}

pub async fn list_wallets(
    State(state): State<AppState>,
    Query(q): Query<WalletQuery>,
) -> ApiResult<Vec<Map<String, Value>>> {
    blocking(move || {
        state
            .backend
            .select_rows(WALLETS_TABLE, None, q.limit)
            .map_err(|e| e.to_string())
    })
    .await
}

pub async fn preview_alerts(State(state): State<AppState>) -> ApiResult<AlertReport> {
    blocking(move || {
        aggregator::preview(state.backend.as_ref(), &state.thresholds).map_err(|e| e.to_string())
    })
    .await
}
