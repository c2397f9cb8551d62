use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::errors::BookError;
use crate::orders::{Order, Price, Side};

/// One fill produced by matching. `ask` and `bid` are snapshots taken
/// right after the fill was applied, so at least one of the two is fully
/// consumed and `size_filled` is always positive.
///
/// The price is the resting limit's price: makers set the level, takers
/// cross it.
#[derive(Debug, Clone)]
pub struct Match {
    pub ask: Order,
    pub bid: Order,
    pub size_filled: f64,
    pub price: f64,
}

/// The resting orders at a single price level, in strict arrival order.
///
/// `total_volume` is kept equal to the sum of the queued sizes on every
/// mutation; the book relies on it for sweep preconditions and for the
/// per-side volume views.
#[derive(Debug)]
pub struct Limit {
    price: Price,
    orders: VecDeque<Order>,
    total_volume: f64,
}

impl Limit {
    fn new(price: Price) -> Self {
        Limit {
            price,
            orders: VecDeque::new(),
            total_volume: 0.0,
        }
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn add(&mut self, mut order: Order) {
        order.limit_price = Some(self.price);
        self.total_volume += order.size;
        self.orders.push_back(order);
    }

    /// O(n) identity scan. Removal preserves the arrival order of the
    /// remaining queue.
    fn delete(&mut self, id: i64) -> Option<Order> {
        let pos = self.orders.iter().position(|o| o.id == id)?;
        let mut order = self.orders.remove(pos)?;
        self.total_volume -= order.size;
        order.limit_price = None;
        Some(order)
    }

    /// Walks resting orders in arrival order, filling `min(resting,
    /// incoming)` at each step until the incoming order is exhausted or
    /// the queue runs dry. Fully consumed resting orders are popped from
    /// the queue; the caller prunes them from its id index using the
    /// returned match records.
    fn fill(&mut self, incoming: &mut Order) -> Vec<Match> {
        let mut matches = Vec::new();
        loop {
            if incoming.size == 0.0 {
                break;
            }
            let Some(resting) = self.orders.front_mut() else {
                break;
            };
            let size_filled = incoming.size.min(resting.size);
            resting.size -= size_filled;
            incoming.size -= size_filled;
            self.total_volume -= size_filled;

            let resting_snapshot = if resting.is_filled() {
                let mut done = resting.clone();
                done.limit_price = None;
                self.orders.pop_front();
                done
            } else {
                resting.clone()
            };

            let (ask, bid) = match incoming.side {
                Side::Bid => (resting_snapshot, incoming.clone()),
                Side::Ask => (incoming.clone(), resting_snapshot),
            };
            matches.push(Match {
                ask,
                bid,
                size_filled,
                price: self.price.value(),
            });
        }
        matches
    }
}

/// A price-time priority order book for one market.
///
/// Both ladders are `BTreeMap`s keyed by [`Price`], so insertion is
/// O(log n) and the best price on either side is the first or last entry.
/// The id index maps every resting order to its side and level for O(1)
/// cancellation routing.
#[derive(Debug, Default)]
pub struct OrderBook {
    asks: BTreeMap<Price, Limit>,
    bids: BTreeMap<Price, Limit>,
    index: HashMap<i64, (Side, Price)>,
}

impl OrderBook {
    pub fn new() -> Self {
        OrderBook {
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    /// Rests `order` at `price` on its side of the book. Placement is
    /// passive: limits never match here, so a crossing limit simply rests
    /// (aggressive flow is expressed as market orders).
    pub fn place_limit(&mut self, price: Price, order: Order) {
        let side = order.side;
        let id = order.id;
        let ladder = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        ladder
            .entry(price)
            .or_insert_with(|| Limit::new(price))
            .add(order);
        self.index.insert(id, (side, price));
    }

    /// Sweeps the opposite side from the best price outward until the
    /// incoming order is exhausted.
    ///
    /// Fails with [`BookError::InsufficientLiquidity`] before touching the
    /// book when the opposite side cannot absorb the full size. Exhausted
    /// levels are dropped from the ladder and fully filled resting orders
    /// leave the id index.
    pub fn place_market(&mut self, order: &mut Order) -> Result<Vec<Match>, BookError> {
        let available = match order.side {
            Side::Bid => self.ask_total_volume(),
            Side::Ask => self.bid_total_volume(),
        };
        if order.size > available {
            return Err(BookError::InsufficientLiquidity {
                requested: order.size,
                available,
            });
        }

        let mut matches = Vec::new();
        while order.size > 0.0 {
            let entry = match order.side {
                Side::Bid => self.asks.first_entry(),
                Side::Ask => self.bids.last_entry(),
            };
            let Some(mut level) = entry else {
                break;
            };
            matches.extend(level.get_mut().fill(order));
            if level.get().is_empty() {
                level.remove();
            }
        }

        for m in &matches {
            let resting = match order.side {
                Side::Bid => &m.ask,
                Side::Ask => &m.bid,
            };
            if resting.is_filled() {
                self.index.remove(&resting.id);
            }
        }
        Ok(matches)
    }

    /// Id-indexed cancellation: route to the owning level, unlink, and
    /// drop the level if it emptied.
    pub fn cancel(&mut self, id: i64) -> Result<Order, BookError> {
        let (side, price) = self.index.remove(&id).ok_or(BookError::OrderNotFound(id))?;
        let ladder = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        // Index and ladders move together; a dangling entry is a bug, not
        // a runtime condition.
        let level = ladder
            .get_mut(&price)
            .expect("order index references a missing price level");
        let order = level
            .delete(id)
            .expect("order index references a missing order");
        if level.is_empty() {
            ladder.remove(&price);
        }
        Ok(order)
    }

    pub fn best_bid(&self) -> Option<&Limit> {
        self.bids.values().next_back()
    }

    pub fn best_ask(&self) -> Option<&Limit> {
        self.asks.values().next()
    }

    pub fn bid_total_volume(&self) -> f64 {
        self.bids.values().map(Limit::total_volume).sum()
    }

    pub fn ask_total_volume(&self) -> f64 {
        self.asks.values().map(Limit::total_volume).sum()
    }

    /// Ask levels, best (lowest) first.
    pub fn asks(&self) -> impl Iterator<Item = &Limit> {
        self.asks.values()
    }

    /// Bid levels, best (highest) first.
    pub fn bids(&self) -> impl Iterator<Item = &Limit> {
        self.bids.values().rev()
    }

    /// Looks up a resting order through the id index.
    pub fn order(&self, id: i64) -> Option<&Order> {
        let (side, price) = self.index.get(&id)?;
        let ladder = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        ladder.get(price)?.orders.iter().find(|o| o.id == id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.index.contains_key(&id)
    }

    /// Number of resting orders across both sides.
    pub fn order_count(&self) -> usize {
        self.index.len()
    }
}
