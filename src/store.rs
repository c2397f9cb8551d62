use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use bincode::{
    config::standard,
    error::{DecodeError, EncodeError},
};
use parity_db::{ColId, Db, Options};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::market::Market;
use crate::orderbook::Match;

/// Errors from the trade-history store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ParityDB error: {0}")]
    Parity(#[from] parity_db::Error),

    #[error("bincode encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("bincode decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid cursor")]
    BadCursor,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A historical fill, as served by `GET /trades/{market}`.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode, Serialize, Deserialize)]
pub struct Trade {
    #[serde(rename = "Market")]
    pub market: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Size")]
    pub size: f64,
    #[serde(rename = "AskOrderID")]
    pub ask_order_id: i64,
    #[serde(rename = "BidOrderID")]
    pub bid_order_id: i64,
    #[serde(rename = "AskUserID")]
    pub ask_user_id: i64,
    #[serde(rename = "BidUserID")]
    pub bid_user_id: i64,
    /// Engine-monotonic nanosecond stamp of the taker order.
    #[serde(rename = "Timestamp")]
    pub timestamp: u64,
}

impl Trade {
    pub fn from_match(market: &Market, m: &Match) -> Self {
        Trade {
            market: market.code().to_owned(),
            price: m.price,
            size: m.size_filled,
            ask_order_id: m.ask.id,
            bid_order_id: m.bid.id,
            ask_user_id: m.ask.user_id,
            bid_user_id: m.bid.user_id,
            timestamp: m.ask.timestamp.max(m.bid.timestamp),
        }
    }
}

// Versioned, opaque pagination cursor encoded as URL-safe base64 JSON.
#[derive(Serialize, Deserialize)]
struct Cursor {
    v: u8,
    ts: u64,
    ask_order_id: i64,
    bid_order_id: i64,
}

/// ParityDB-backed trade history.
///
/// Key layout (big-endian for lexicographic ordering):
/// `"{market}:" + timestamp(u64) + ask_order_id(i64) + bid_order_id(i64)`
///
/// Order ids are positive, so their big-endian bytes sort numerically and
/// break ties between same-stamp fills deterministically.
pub struct TradeStore {
    db: Db,
}

const COL: ColId = 0;

impl TradeStore {
    /// Opens (or creates) the store with a single B-tree indexed column.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::with_columns(path.as_ref(), 1);
        opts.columns[0].btree_index = true;
        let db = Db::open_or_create(&opts)?;
        Ok(TradeStore { db })
    }

    fn prefix(market: &str) -> Vec<u8> {
        let mut k = Vec::with_capacity(market.len() + 1);
        k.extend_from_slice(market.as_bytes());
        k.push(b':');
        k
    }

    fn encode_key(trade: &Trade) -> Vec<u8> {
        let mut key = Self::prefix(&trade.market);
        key.extend_from_slice(&trade.timestamp.to_be_bytes());
        key.extend_from_slice(&trade.ask_order_id.to_be_bytes());
        key.extend_from_slice(&trade.bid_order_id.to_be_bytes());
        key
    }

    fn key_from_cursor(market: &str, c: &Cursor) -> Vec<u8> {
        let mut key = Self::prefix(market);
        key.extend_from_slice(&c.ts.to_be_bytes());
        key.extend_from_slice(&c.ask_order_id.to_be_bytes());
        key.extend_from_slice(&c.bid_order_id.to_be_bytes());
        key
    }

    fn encode_cursor(trade: &Trade) -> String {
        let c = Cursor {
            v: 1,
            ts: trade.timestamp,
            ask_order_id: trade.ask_order_id,
            bid_order_id: trade.bid_order_id,
        };
        // Cursor serialization is infallible for these plain fields.
        B64.encode(serde_json::to_vec(&c).unwrap_or_default())
    }

    fn decode_cursor(s: &str) -> StoreResult<Cursor> {
        let bytes = B64.decode(s).map_err(|_| StoreError::BadCursor)?;
        let c: Cursor = serde_json::from_slice(&bytes).map_err(|_| StoreError::BadCursor)?;
        if c.v != 1 {
            return Err(StoreError::BadCursor);
        }
        Ok(c)
    }

    pub fn insert_trade(&mut self, trade: &Trade) -> StoreResult<()> {
        let key = Self::encode_key(trade);
        let value = bincode::encode_to_vec(trade, standard())?;
        self.db.commit(vec![(COL, key, Some(value))])?;
        Ok(())
    }

    /// Pages forward (oldest first) through a market's trades, starting
    /// strictly after `after` when given. Returns `(items, next_cursor)`;
    /// the cursor is only present when at least one more trade exists
    /// beyond the returned page.
    pub fn page_trades(
        &self,
        market: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<Trade>, Option<String>)> {
        let mut it = self.db.iter(COL)?;
        let prefix = Self::prefix(market);

        if let Some(raw) = after {
            // The cursor must name an existing key for this market, which
            // also rejects cursors minted on another market's page.
            let full = Self::key_from_cursor(market, &Self::decode_cursor(raw)?);
            it.seek(&full)?;
            match it.next()? {
                Some((k, _)) if k == full => {}
                _ => return Err(StoreError::BadCursor),
            }
        } else {
            it.seek(&prefix)?;
        }

        // Look-ahead read of limit + 1 to know whether another page exists.
        let mut items = Vec::with_capacity(limit.min(256));
        let mut page_cursor = None;
        let mut read = 0usize;
        while read < limit + 1 {
            match it.next()? {
                Some((k, v)) if k.starts_with(&prefix) => {
                    let (trade, _): (Trade, usize) = bincode::decode_from_slice(&v, standard())?;
                    if items.len() < limit {
                        page_cursor = Some(Self::encode_cursor(&trade));
                        items.push(trade);
                    }
                    read += 1;
                }
                _ => break,
            }
        }

        let next = if read > limit && !items.is_empty() {
            page_cursor
        } else {
            None
        };
        Ok((items, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn trade(market: &str, ts: u64, price: f64) -> Trade {
        Trade {
            market: market.into(),
            price,
            size: 1.0,
            ask_order_id: ts as i64,
            bid_order_id: ts as i64 + 1,
            ask_user_id: 8,
            bid_user_id: 9,
            timestamp: ts,
        }
    }

    #[test]
    fn pages_forward_with_lookahead_cursor() {
        let dir = tempdir().unwrap();
        let mut store = TradeStore::open(dir.path()).unwrap();
        store.insert_trade(&trade("ETH", 1, 50.0)).unwrap();
        store.insert_trade(&trade("ETH", 2, 51.0)).unwrap();

        let (page1, cursor) = store.page_trades("ETH", None, 1).unwrap();
        assert_eq!(page1.len(), 1);
        assert_eq!(page1[0].price, 50.0);
        let cursor = cursor.expect("a next page exists");

        let (page2, end) = store.page_trades("ETH", Some(&cursor), 1).unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].price, 51.0);
        assert!(end.is_none(), "no next after the final page");
    }

    #[test]
    fn markets_are_isolated_and_cursors_do_not_cross() {
        let dir = tempdir().unwrap();
        let mut store = TradeStore::open(dir.path()).unwrap();
        store.insert_trade(&trade("BTC", 1, 50.0)).unwrap();
        store.insert_trade(&trade("ETH", 2, 70.0)).unwrap();
        store.insert_trade(&trade("BTC", 3, 52.0)).unwrap();

        let (btc, cursor) = store.page_trades("BTC", None, 1).unwrap();
        assert_eq!(btc[0].price, 50.0);
        let cursor = cursor.unwrap();

        assert!(matches!(
            store.page_trades("ETH", Some(&cursor), 1),
            Err(StoreError::BadCursor)
        ));

        let (page2, _) = store.page_trades("BTC", Some(&cursor), 1).unwrap();
        assert_eq!(page2[0].price, 52.0);
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        let dir = tempdir().unwrap();
        let store = TradeStore::open(dir.path()).unwrap();

        for bad in [
            "!!!notbase64!!!".to_owned(),
            B64.encode(b"\xFF\xFE\xFD"),
            B64.encode(serde_json::to_vec(&serde_json::json!({"x": 1})).unwrap()),
            B64.encode(
                serde_json::to_vec(
                    &serde_json::json!({"v": 2u8, "ts": 1u64, "ask_order_id": 1i64, "bid_order_id": 2i64}),
                )
                .unwrap(),
            ),
        ] {
            assert!(matches!(
                store.page_trades("ETH", Some(&bad), 10),
                Err(StoreError::BadCursor)
            ));
        }
    }
}
