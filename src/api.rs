use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::warn;

use crate::{
    errors::{BookError, ExchangeError},
    exchange::settlement_transfers,
    market::Market,
    orderbook::{Limit, Match},
    orders::{Order, Price, Side},
    state::AppState,
    store::{StoreError, Trade},
};

type ApiErr = (StatusCode, Json<serde_json::Value>);

fn err(status: StatusCode, msg: &str) -> ApiErr {
    (status, Json(json!({ "msg": msg })))
}

fn exchange_err(e: ExchangeError) -> ApiErr {
    let status = match &e {
        ExchangeError::MarketNotFound(_) => StatusCode::BAD_REQUEST,
        ExchangeError::Book(BookError::OrderNotFound(_)) => StatusCode::NOT_FOUND,
        ExchangeError::Book(_) => StatusCode::BAD_REQUEST,
    };
    err(status, &e.to_string())
}

/// JSON extractor that maps every decode failure to a 400 with the
/// standard `{"msg": ...}` body, logging a capped preview of the payload.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiErr;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| err(StatusCode::BAD_REQUEST, &e.to_string()))?;
        match serde_json::from_slice::<T>(&bytes) {
            Ok(val) => Ok(ApiJson(val)),
            Err(e) => {
                let preview = String::from_utf8_lossy(&bytes);
                let preview = &preview[..preview.len().min(4096)];
                warn!(error = %e, body_preview = %preview, "rejecting malformed request body");
                Err(err(StatusCode::BAD_REQUEST, &e.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "MARKET")]
    Market,
}

/// Body of `POST /order`. `Price` is required for limit orders and
/// ignored for market orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    #[serde(rename = "Type")]
    pub order_type: OrderType,
    #[serde(rename = "Bid")]
    pub bid: bool,
    #[serde(rename = "Size")]
    pub size: f64,
    #[serde(rename = "Price", default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(rename = "Market")]
    pub market: String,
    #[serde(rename = "UserID")]
    pub user_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    #[serde(rename = "OrderID")]
    pub order_id: i64,
}

/// A resting order as emitted on every read endpoint; `Price` is the
/// owning limit's level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderView {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "UserID")]
    pub user_id: i64,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Size")]
    pub size: f64,
    #[serde(rename = "Bid")]
    pub bid: bool,
    #[serde(rename = "Timestamp")]
    pub timestamp: u64,
}

impl OrderView {
    fn resting(limit: &Limit, order: &Order) -> Self {
        OrderView {
            id: order.id,
            user_id: order.user_id,
            price: limit.price().value(),
            size: order.size,
            bid: order.side == Side::Bid,
            timestamp: order.timestamp,
        }
    }

    fn from_order(order: &Order) -> Self {
        OrderView {
            id: order.id,
            user_id: order.user_id,
            price: order.limit_price.map(Price::value).unwrap_or_default(),
            size: order.size,
            bid: order.side == Side::Bid,
            timestamp: order.timestamp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderBookResponse {
    #[serde(rename = "TotalBidVolume")]
    pub total_bid_volume: f64,
    #[serde(rename = "TotalAskVolume")]
    pub total_ask_volume: f64,
    #[serde(rename = "Asks")]
    pub asks: Vec<OrderView>,
    #[serde(rename = "Bids")]
    pub bids: Vec<OrderView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BestPriceResponse {
    #[serde(rename = "Price")]
    pub price: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserOrdersResponse {
    #[serde(rename = "Asks")]
    pub asks: Vec<OrderView>,
    #[serde(rename = "Bids")]
    pub bids: Vec<OrderView>,
}

fn default_trades_limit() -> usize {
    100
}

#[derive(Deserialize)]
pub struct TradesQuery {
    #[serde(default = "default_trades_limit")]
    limit: usize,
    after: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TradesPage {
    #[serde(rename = "Trades")]
    pub trades: Vec<Trade>,
    #[serde(rename = "Next")]
    pub next: Option<String>,
}

fn parse_market(raw: &str) -> Result<Market, ApiErr> {
    Market::new(raw).map_err(|e| err(StatusCode::BAD_REQUEST, &e.to_string()))
}

/// `POST /order`
///
/// Limit orders rest; market orders sweep and settle. Either way the
/// response is the newly assigned order id. The exchange lock is released
/// before trades are persisted and settlement is dispatched.
pub async fn place_order(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<PlaceOrderRequest>,
) -> Result<Json<PlaceOrderResponse>, ApiErr> {
    let market = parse_market(&payload.market)?;
    let side = if payload.bid { Side::Bid } else { Side::Ask };

    match payload.order_type {
        OrderType::Limit => {
            let Some(price) = payload.price else {
                return Err(err(StatusCode::BAD_REQUEST, "limit order requires a price"));
            };
            let order_id = state
                .exchange
                .write()
                .await
                .place_limit_order(&market, payload.user_id, side, payload.size, price)
                .map_err(exchange_err)?;
            Ok(Json(PlaceOrderResponse { order_id }))
        }
        OrderType::Market => {
            let sweep = state
                .exchange
                .write()
                .await
                .place_market_order(&market, payload.user_id, side, payload.size)
                .map_err(exchange_err)?;

            record_trades(&state, &market, &sweep.matches).await;
            for transfer in settlement_transfers(&sweep.matches) {
                if state.transfers_tx.send(transfer).is_err() {
                    warn!("settlement worker unavailable; dropping transfer");
                }
            }
            Ok(Json(PlaceOrderResponse {
                order_id: sweep.order_id,
            }))
        }
    }
}

/// Trade-log persistence is best-effort: a store failure is logged and
/// the response still reflects the committed book state.
async fn record_trades(state: &AppState, market: &Market, matches: &[Match]) {
    if matches.is_empty() {
        return;
    }
    let mut store = state.store.write().await;
    for m in matches {
        if let Err(e) = store.insert_trade(&Trade::from_match(market, m)) {
            warn!(error = %e, market = %market, "failed to persist trade");
        }
    }
}

/// `GET /book/{market}`
pub async fn get_book(
    Path(market): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<OrderBookResponse>, ApiErr> {
    let market = parse_market(&market)?;
    let exchange = state.exchange.read().await;
    let book = exchange.book(&market).map_err(exchange_err)?;

    let asks = book
        .asks()
        .flat_map(|l| l.orders().map(move |o| OrderView::resting(l, o)))
        .collect();
    let bids = book
        .bids()
        .flat_map(|l| l.orders().map(move |o| OrderView::resting(l, o)))
        .collect();

    Ok(Json(OrderBookResponse {
        total_bid_volume: book.bid_total_volume(),
        total_ask_volume: book.ask_total_volume(),
        asks,
        bids,
    }))
}

/// `GET /book/{market}/bestbid`
pub async fn get_best_bid(
    Path(market): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BestPriceResponse>, ApiErr> {
    let market = parse_market(&market)?;
    let price = state
        .exchange
        .read()
        .await
        .best_bid(&market)
        .map_err(exchange_err)?
        .ok_or_else(|| err(StatusCode::BAD_REQUEST, "no resting bids"))?;
    Ok(Json(BestPriceResponse { price }))
}

/// `GET /book/{market}/bestask`
pub async fn get_best_ask(
    Path(market): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BestPriceResponse>, ApiErr> {
    let market = parse_market(&market)?;
    let price = state
        .exchange
        .read()
        .await
        .best_ask(&market)
        .map_err(exchange_err)?
        .ok_or_else(|| err(StatusCode::BAD_REQUEST, "no resting asks"))?;
    Ok(Json(BestPriceResponse { price }))
}

/// `GET /order/{user_id}`: the user's resting orders, split by side.
pub async fn get_user_orders(
    Path(user_id): Path<i64>,
    State(state): State<AppState>,
) -> Json<UserOrdersResponse> {
    let exchange = state.exchange.read().await;
    let (mut asks, mut bids) = (Vec::new(), Vec::new());
    for order in exchange.orders_for_user(user_id) {
        let view = OrderView::from_order(order);
        match order.side {
            Side::Ask => asks.push(view),
            Side::Bid => bids.push(view),
        }
    }
    Json(UserOrdersResponse { asks, bids })
}

/// `DELETE /order/{id}`: unknown ids are a 404, not a silent no-op.
pub async fn cancel_order(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    state
        .exchange
        .write()
        .await
        .cancel_order(id)
        .map_err(exchange_err)?;
    Ok(Json(json!({ "msg": "order cancelled", "id": id })))
}

/// `GET /trades/{market}`: historical fills, oldest first, cursor-paged.
pub async fn get_trades(
    Path(market): Path<String>,
    State(state): State<AppState>,
    Query(q): Query<TradesQuery>,
) -> Result<Json<TradesPage>, ApiErr> {
    let market = parse_market(&market)?;
    let limit = q.limit.min(1_000);
    let (trades, next) = state
        .store
        .read()
        .await
        .page_trades(market.code(), q.after.as_deref(), limit)
        .map_err(|e| match e {
            StoreError::BadCursor => err(StatusCode::BAD_REQUEST, "invalid cursor"),
            other => err(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string()),
        })?;
    Ok(Json(TradesPage { trades, next }))
}

/// Builds the application router over shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/order", post(place_order))
        .route("/order/{id}", get(get_user_orders).delete(cancel_order))
        .route("/book/{market}", get(get_book))
        .route("/book/{market}/bestbid", get(get_best_bid))
        .route("/book/{market}/bestask", get(get_best_ask))
        .route("/trades/{market}", get(get_trades))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(false)
                        .level(tracing::Level::TRACE),
                )
                .on_response(DefaultOnResponse::new().level(tracing::Level::TRACE)),
        )
        .with_state(state)
}
