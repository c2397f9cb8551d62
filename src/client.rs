use reqwest::StatusCode;
use serde::Deserialize;

use crate::api::{
    BestPriceResponse, OrderBookResponse, OrderType, PlaceOrderRequest, PlaceOrderResponse,
};
use crate::errors::{ClientError, MarketMakerError};
use crate::market::Market;
use crate::market_maker::ExchangeApi;
use crate::orders::Side;

#[derive(Deserialize)]
struct ErrorBody {
    msg: String,
}

/// Typed HTTP client for the exchange API, used by the market maker and
/// the simulator. Holds nothing but a base URL and a connection pool.
pub struct ExchangeClient {
    http: reqwest::Client,
    base: String,
}

impl ExchangeClient {
    pub fn new(base: impl Into<String>) -> Self {
        ExchangeClient {
            http: reqwest::Client::new(),
            base: base.into(),
        }
    }

    async fn rejection(resp: reqwest::Response) -> ClientError {
        match resp.json::<ErrorBody>().await {
            Ok(body) => ClientError::Rejected(body.msg),
            Err(e) => ClientError::Transport(e),
        }
    }

    pub async fn place_order(
        &self,
        req: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, ClientError> {
        let resp = self
            .http
            .post(format!("{}/order", self.base))
            .json(req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        Ok(resp.json().await?)
    }

    pub async fn cancel_order(&self, id: i64) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(format!("{}/order/{}", self.base, id))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        Ok(())
    }

    pub async fn get_book(&self, market: &Market) -> Result<OrderBookResponse, ClientError> {
        let resp = self
            .http
            .get(format!("{}/book/{}", self.base, market.code()))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Best price on one side; an empty side comes back as `None` (the
    /// server reports it as a 400).
    async fn best_price(&self, market: &Market, leg: &str) -> Result<Option<f64>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/book/{}/{}", self.base, market.code(), leg))
            .send()
            .await?;
        if resp.status() == StatusCode::BAD_REQUEST {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        let body: BestPriceResponse = resp.json().await?;
        Ok(Some(body.price))
    }
}

impl ExchangeApi for ExchangeClient {
    async fn best_bid(&self, market: &Market) -> Result<Option<f64>, MarketMakerError> {
        Ok(self.best_price(market, "bestbid").await?)
    }

    async fn best_ask(&self, market: &Market) -> Result<Option<f64>, MarketMakerError> {
        Ok(self.best_price(market, "bestask").await?)
    }

    async fn place_limit_order(
        &self,
        market: &Market,
        user_id: i64,
        side: Side,
        size: f64,
        price: f64,
    ) -> Result<i64, MarketMakerError> {
        let ack = self
            .place_order(&PlaceOrderRequest {
                order_type: OrderType::Limit,
                bid: side == Side::Bid,
                size,
                price: Some(price),
                market: market.code().to_owned(),
                user_id,
            })
            .await?;
        Ok(ack.order_id)
    }
}
