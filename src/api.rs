use axum::{
    Json, Router, debug_handler,
    extract::{
        FromRequest, FromRequestParts, Path, Query, Request, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, request::Parts},
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::{
    engine::{BookSnapshot, TradingStats},
    errors::ApiError,
    instrument::Pair,
    orders::{NewOrder, Order, OrderFilter},
    state::AppState,
    trade::Trade,
    transaction::{NewDeposit, NewWithdrawal, Transaction, TxFilter, TxStatusUpdate},
    wallet::{Balance, Wallet},
};

/// Header carrying the caller's identity, set by the authentication layer in front of us.
pub const OWNER_HEADER: &str = "x-user-id";
pub const EFFECTIVE_DEPTH_HEADER: &str = "x-effective-depth";
pub const EFFECTIVE_LIMIT_HEADER: &str = "x-effective-limit";

/// Trusted owner id of the caller.
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or(ApiError::MissingIdentity)
    }
}

/// `Json` that reports rejections in the API error shape. Well-formed JSON
/// with wrong field values counts as a validation failure (400).
pub struct LoggedJson<T>(pub T);

impl<S, T> FromRequest<S> for LoggedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(LoggedJson(value)),
            Err(rejection) => {
                let status = match &rejection {
                    JsonRejection::JsonDataError(_) => StatusCode::BAD_REQUEST,
                    other => other.status(),
                };
                Err(ApiError::BadBody {
                    status,
                    message: rejection.body_text(),
                })
            }
        }
    }
}

/// `Query` counterpart of [`LoggedJson`].
pub struct LoggedQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for LoggedQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(v)| LoggedQuery(v))
            .map_err(|rejection: QueryRejection| ApiError::BadBody {
                status: rejection.status(),
                message: rejection.body_text(),
            })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub pair: Option<String>,
    pub limit: Option<usize>,
}

/// Operator fill of an order.
#[derive(Debug, Deserialize)]
pub struct FillRequest {
    pub amount: Decimal,
    pub price: Option<Decimal>,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn get_order_book(
    State(state): State<AppState>,
    Path(pair): Path<String>,
    LoggedQuery(q): LoggedQuery<DepthQuery>,
) -> Result<(HeaderMap, Json<BookSnapshot>), ApiError> {
    let depth = state.config.effective_depth(q.depth);
    let snapshot = state.read().get_order_book(&pair, depth)?;
    let mut headers = HeaderMap::new();
    headers.insert(EFFECTIVE_DEPTH_HEADER, HeaderValue::from(depth));
    Ok((headers, Json(snapshot)))
}

pub async fn get_trading_stats(
    State(state): State<AppState>,
    Path(pair): Path<String>,
) -> Result<Json<TradingStats>, ApiError> {
    Ok(Json(state.read().get_trading_stats(&pair)?))
}

#[derive(Debug, Serialize)]
pub struct RecentTrades {
    pub pair: Pair,
    pub trades: Vec<Trade>,
}

pub async fn recent_trades(
    State(state): State<AppState>,
    Path(pair): Path<String>,
    LoggedQuery(q): LoggedQuery<LimitQuery>,
) -> Result<(HeaderMap, Json<RecentTrades>), ApiError> {
    let limit = state.config.effective_trades_limit(q.limit);
    let pair: Pair = pair.parse()?;
    let trades = state.read().recent_trades(&pair.code(), Some(limit))?;
    let mut headers = HeaderMap::new();
    headers.insert(EFFECTIVE_LIMIT_HEADER, HeaderValue::from(limit));
    Ok((headers, Json(RecentTrades { pair, trades })))
}

#[debug_handler]
pub async fn place_order(
    State(state): State<AppState>,
    Owner(owner): Owner,
    LoggedJson(payload): LoggedJson<NewOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.write().place_order(&owner, payload)?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Owner(owner): Owner,
    LoggedQuery(filter): LoggedQuery<OrderFilter>,
) -> Result<Json<Value>, ApiError> {
    let page = state.read().user_orders(&owner, &filter)?;
    Ok(Json(json!({
        "total": page.orders.len(),
        "orders": page.orders,
        "next": page.next,
    })))
}

pub async fn get_order(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.read().get_order(&order_id, &owner)?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.write().cancel_order(&order_id, &owner)?))
}

pub async fn fill_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    LoggedJson(fill): LoggedJson<FillRequest>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(
        state
            .write()
            .fill_order(&order_id, fill.amount, fill.price)?,
    ))
}

pub async fn trading_history(
    State(state): State<AppState>,
    Owner(owner): Owner,
    LoggedQuery(q): LoggedQuery<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let trades = state
        .read()
        .trading_history(&owner, q.pair.as_deref(), q.limit)?;
    Ok(Json(json!({ "total": trades.len(), "trades": trades })))
}

pub async fn balances(State(state): State<AppState>, Owner(owner): Owner) -> Json<Wallet> {
    Json(state.read().wallet(&owner))
}

pub async fn balance(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(asset): Path<String>,
) -> Result<Json<Balance>, ApiError> {
    Ok(Json(state.read().balance(&owner, &asset)?))
}

pub async fn deposit(
    State(state): State<AppState>,
    Owner(owner): Owner,
    LoggedJson(req): LoggedJson<NewDeposit>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let tx = state.write().deposit(&owner, req)?;
    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn withdraw(
    State(state): State<AppState>,
    Owner(owner): Owner,
    LoggedJson(req): LoggedJson<NewWithdrawal>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let tx = state.write().withdraw(&owner, req)?;
    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Owner(owner): Owner,
    LoggedQuery(filter): LoggedQuery<TxFilter>,
) -> impl IntoResponse {
    let txs = state.read().transactions(&owner, &filter);
    Json(json!({ "total": txs.len(), "transactions": txs }))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(tx_id): Path<String>,
) -> Result<Json<Transaction>, ApiError> {
    Ok(Json(state.read().transaction(&tx_id, &owner)?))
}

pub async fn update_transaction_status(
    State(state): State<AppState>,
    Path(tx_id): Path<String>,
    LoggedJson(update): LoggedJson<TxStatusUpdate>,
) -> Result<Json<Transaction>, ApiError> {
    Ok(Json(
        state.write().update_transaction_status(&tx_id, update)?,
    ))
}

pub fn router(state: AppState) -> Router {
    let trading = Router::new()
        .route("/orderbook/{pair}", get(get_order_book))
        .route("/stats/{pair}", get(get_trading_stats))
        .route("/trades/{pair}", get(recent_trades))
        .route("/orders", post(place_order).get(list_orders))
        .route("/orders/{order_id}", get(get_order).delete(cancel_order))
        .route("/orders/{order_id}/fill", post(fill_order))
        .route("/history", get(trading_history));

    let wallet = Router::new()
        .route("/balances", get(balances))
        .route("/balance/{asset}", get(balance))
        .route("/deposit", post(deposit))
        .route("/withdraw", post(withdraw))
        .route("/transactions", get(list_transactions))
        .route("/transactions/{tx_id}", get(get_transaction))
        .route(
            "/transactions/{tx_id}/status",
            put(update_transaction_status),
        );

    Router::new()
        .route("/api/health", get(health))
        .nest("/api/trading", trading)
        .nest("/api/wallet", wallet)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
