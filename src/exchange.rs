use std::collections::HashMap;
use std::time::Instant;

use tracing::info;

use crate::errors::{BookError, ExchangeError};
use crate::market::Market;
use crate::orderbook::{Match, OrderBook};
use crate::orders::{Order, Price, Side};

/// One fill from the taker's perspective. `order_id` identifies the
/// counterparty (resting) order.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedOrder {
    pub order_id: i64,
    pub price: f64,
    pub size: f64,
}

/// The base-asset movement a match implies: the seller pays the buyer.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub from_user: i64,
    pub to_user: i64,
    pub amount: f64,
}

/// Result of a market-order sweep: the taker's id, per-fill summaries for
/// the response, and the raw match records for settlement and the trade
/// log.
#[derive(Debug)]
pub struct SweepResult {
    pub order_id: i64,
    pub fills: Vec<MatchedOrder>,
    pub matches: Vec<Match>,
}

/// Converts match records into settlement instructions. Runs outside the
/// exchange lock; the matches are already committed to the book.
pub fn settlement_transfers(matches: &[Match]) -> Vec<Transfer> {
    matches
        .iter()
        .map(|m| Transfer {
            from_user: m.ask.user_id,
            to_user: m.bid.user_id,
            amount: m.size_filled,
        })
        .collect()
}

/// The multi-market host: one [`OrderBook`] per configured market, an
/// order→market routing map for O(1) cancellation, and a per-user index
/// of resting orders that is pruned as fills consume them.
///
/// Order ids and arrival timestamps are allocated here, under the caller's
/// write lock, so FIFO priority is race-free across concurrent placers.
pub struct Exchange {
    books: HashMap<Market, OrderBook>,
    order_markets: HashMap<i64, Market>,
    user_orders: HashMap<i64, Vec<i64>>,
    next_order_id: i64,
    started: Instant,
    last_timestamp: u64,
}

impl Exchange {
    pub fn new(markets: impl IntoIterator<Item = Market>) -> Self {
        let books = markets
            .into_iter()
            .map(|m| (m, OrderBook::new()))
            .collect();
        Exchange {
            books,
            order_markets: HashMap::new(),
            user_orders: HashMap::new(),
            next_order_id: 1,
            started: Instant::now(),
            last_timestamp: 0,
        }
    }

    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.books.keys()
    }

    /// Monotonic nanosecond arrival stamp with a strict +1 floor, so two
    /// placements in the same instant still have a total order.
    fn next_timestamp(&mut self) -> u64 {
        let elapsed = self.started.elapsed().as_nanos() as u64;
        self.last_timestamp = elapsed.max(self.last_timestamp + 1);
        self.last_timestamp
    }

    fn new_order(&mut self, user_id: i64, side: Side, size: f64) -> Result<Order, BookError> {
        if !size.is_finite() || size <= 0.0 {
            return Err(BookError::InvalidSize(size));
        }
        let id = self.next_order_id;
        self.next_order_id += 1;
        let timestamp = self.next_timestamp();
        Ok(Order::new(id, user_id, side, size, timestamp))
    }

    pub fn place_limit_order(
        &mut self,
        market: &Market,
        user_id: i64,
        side: Side,
        size: f64,
        price: f64,
    ) -> Result<i64, ExchangeError> {
        let price = Price::new(price)?;
        let order = self.new_order(user_id, side, size)?;
        let id = order.id;
        let Some(book) = self.books.get_mut(market) else {
            return Err(ExchangeError::MarketNotFound(market.code().to_owned()));
        };
        book.place_limit(price, order);
        self.order_markets.insert(id, market.clone());
        self.user_orders.entry(user_id).or_default().push(id);

        info!(
            order_id = id,
            market = %market,
            side = ?side,
            size,
            price = price.value(),
            "limit order resting"
        );
        Ok(id)
    }

    pub fn place_market_order(
        &mut self,
        market: &Market,
        user_id: i64,
        side: Side,
        size: f64,
    ) -> Result<SweepResult, ExchangeError> {
        let mut order = self.new_order(user_id, side, size)?;
        let order_id = order.id;
        let Some(book) = self.books.get_mut(market) else {
            return Err(ExchangeError::MarketNotFound(market.code().to_owned()));
        };
        let matches = book.place_market(&mut order)?;

        // Fully filled resting orders drop out of the routing and user
        // indices; partially filled ones stay resting.
        for m in &matches {
            let resting = match side {
                Side::Bid => &m.ask,
                Side::Ask => &m.bid,
            };
            if resting.is_filled() {
                self.order_markets.remove(&resting.id);
                if let Some(ids) = self.user_orders.get_mut(&resting.user_id) {
                    ids.retain(|&oid| oid != resting.id);
                }
            }
        }

        let fills: Vec<MatchedOrder> = matches
            .iter()
            .map(|m| {
                let counterparty = match side {
                    Side::Bid => &m.ask,
                    Side::Ask => &m.bid,
                };
                MatchedOrder {
                    order_id: counterparty.id,
                    price: m.price,
                    size: m.size_filled,
                }
            })
            .collect();

        let size_filled: f64 = fills.iter().map(|f| f.size).sum();
        if size_filled > 0.0 {
            let avg_price =
                fills.iter().map(|f| f.price * f.size).sum::<f64>() / size_filled;
            info!(
                order_id,
                market = %market,
                side = ?side,
                size_filled,
                avg_price,
                "market order filled"
            );
        }

        Ok(SweepResult {
            order_id,
            fills,
            matches,
        })
    }

    pub fn cancel_order(&mut self, id: i64) -> Result<Order, ExchangeError> {
        let Some(market) = self.order_markets.remove(&id) else {
            return Err(ExchangeError::Book(BookError::OrderNotFound(id)));
        };
        let book = self
            .books
            .get_mut(&market)
            .expect("order routed to an unregistered market");
        let order = book.cancel(id)?;
        if let Some(ids) = self.user_orders.get_mut(&order.user_id) {
            ids.retain(|&oid| oid != id);
        }
        info!(order_id = id, market = %market, "order cancelled");
        Ok(order)
    }

    pub fn book(&self, market: &Market) -> Result<&OrderBook, ExchangeError> {
        self.books
            .get(market)
            .ok_or_else(|| ExchangeError::MarketNotFound(market.code().to_owned()))
    }

    pub fn best_bid(&self, market: &Market) -> Result<Option<f64>, ExchangeError> {
        Ok(self.book(market)?.best_bid().map(|l| l.price().value()))
    }

    pub fn best_ask(&self, market: &Market) -> Result<Option<f64>, ExchangeError> {
        Ok(self.book(market)?.best_ask().map(|l| l.price().value()))
    }

    /// The user's currently resting orders, in placement order.
    pub fn orders_for_user(&self, user_id: i64) -> Vec<&Order> {
        let Some(ids) = self.user_orders.get(&user_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                let market = self.order_markets.get(id)?;
                self.books.get(market)?.order(*id)
            })
            .collect()
    }
}
