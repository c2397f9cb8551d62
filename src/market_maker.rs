use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::MarketMakerError;
use crate::market::Market;
use crate::orders::Side;

/// The order-entry surface the maker quotes through. The production
/// implementation is the plain HTTP client, so the maker holds no
/// privileged handle into the engine; it competes with every other
/// client for the same lock.
#[allow(async_fn_in_trait)]
pub trait ExchangeApi {
    async fn best_bid(&self, market: &Market) -> Result<Option<f64>, MarketMakerError>;
    async fn best_ask(&self, market: &Market) -> Result<Option<f64>, MarketMakerError>;
    async fn place_limit_order(
        &self,
        market: &Market,
        user_id: i64,
        side: Side,
        size: f64,
        price: f64,
    ) -> Result<i64, MarketMakerError>;
}

/// Reference-price source, consulted only to seed an empty book.
#[allow(async_fn_in_trait)]
pub trait PriceOracle {
    async fn reference_price(&self, market: &Market) -> Result<f64, MarketMakerError>;
}

/// Fixed-price stand-in for a real feed, with a small synthetic fetch
/// delay so the seeding path behaves like a network call.
pub struct StaticOracle {
    pub price: f64,
}

impl PriceOracle for StaticOracle {
    async fn reference_price(&self, _market: &Market) -> Result<f64, MarketMakerError> {
        time::sleep(Duration::from_millis(80)).await;
        Ok(self.price)
    }
}

#[derive(Debug, Clone)]
pub struct MarketMakerConfig {
    pub user_id: i64,
    pub market: Market,
    /// Size of each quote.
    pub order_size: f64,
    /// Below or at this spread the maker sits out the tick.
    pub min_spread: f64,
    /// Distance from the reference price when seeding an empty book.
    pub seed_offset: f64,
    /// How far inside the current spread each quote lands.
    pub price_offset: f64,
    pub interval: Duration,
}

/// A periodic two-sided quoting loop: seeds empty books from the oracle,
/// otherwise tightens the spread symmetrically whenever it is wider than
/// `min_spread`.
pub struct MarketMaker<V, O> {
    cfg: MarketMakerConfig,
    venue: V,
    oracle: O,
}

impl<V: ExchangeApi, O: PriceOracle> MarketMaker<V, O> {
    pub fn new(cfg: MarketMakerConfig, venue: V, oracle: O) -> Self {
        MarketMaker { cfg, venue, oracle }
    }

    /// Runs until cancelled. The first fetch or placement error terminates
    /// the loop: stale quotes are worse than absent ones, so restarting
    /// after a failure is an operator decision.
    pub async fn run(self, token: CancellationToken) -> Result<(), MarketMakerError> {
        info!(
            user_id = self.cfg.user_id,
            market = %self.cfg.market,
            order_size = self.cfg.order_size,
            min_spread = self.cfg.min_spread,
            interval = ?self.cfg.interval,
            "market maker starting"
        );
        let mut ticker = time::interval(self.cfg.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("market maker shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => self.tick().await?,
            }
        }
    }

    async fn tick(&self) -> Result<(), MarketMakerError> {
        let bid = self.venue.best_bid(&self.cfg.market).await?;
        let ask = self.venue.best_ask(&self.cfg.market).await?;

        // With one side missing, synthesize the other at twice the quote
        // offset from the present side to get a workable spread estimate.
        let (best_bid, best_ask) = match (bid, ask) {
            (None, None) => return self.seed().await,
            (Some(b), None) => (b, b + 2.0 * self.cfg.price_offset),
            (None, Some(a)) => (a - 2.0 * self.cfg.price_offset, a),
            (Some(b), Some(a)) => (b, a),
        };

        let spread = best_ask - best_bid;
        if spread <= self.cfg.min_spread {
            debug!(spread, "spread tight enough; sitting out this tick");
            return Ok(());
        }

        self.place(Side::Bid, best_bid + self.cfg.price_offset).await?;
        self.place(Side::Ask, best_ask - self.cfg.price_offset).await?;
        Ok(())
    }

    async fn seed(&self) -> Result<(), MarketMakerError> {
        let reference = self.oracle.reference_price(&self.cfg.market).await?;
        info!(
            reference,
            seed_offset = self.cfg.seed_offset,
            "book empty; seeding both sides"
        );
        self.place(Side::Bid, reference - self.cfg.seed_offset).await?;
        self.place(Side::Ask, reference + self.cfg.seed_offset).await?;
        Ok(())
    }

    async fn place(&self, side: Side, price: f64) -> Result<(), MarketMakerError> {
        let order_id = self
            .venue
            .place_limit_order(
                &self.cfg.market,
                self.cfg.user_id,
                side,
                self.cfg.order_size,
                price,
            )
            .await?;
        debug!(order_id, side = ?side, price, "quote placed");
        Ok(())
    }
}
