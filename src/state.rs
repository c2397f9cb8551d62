use std::path::Path;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

use crate::exchange::{Exchange, Transfer};
use crate::market::Market;
use crate::store::{StoreResult, TradeStore};

/// Shared handles for the HTTP surface.
///
/// The exchange sits behind one `RwLock`: mutations take the write half,
/// read-only views the read half. Settlement work leaves through
/// `transfers_tx` only after the lock has been released, so the book
/// never waits on a chain round-trip.
#[derive(Clone)]
pub struct AppState {
    pub exchange: Arc<RwLock<Exchange>>,
    pub store: Arc<RwLock<TradeStore>>,
    pub transfers_tx: mpsc::UnboundedSender<Transfer>,
}

impl AppState {
    /// Builds the state and the receiving half of the settlement queue,
    /// which the caller hands to a settlement worker.
    pub fn new(
        markets: impl IntoIterator<Item = Market>,
        store_path: &Path,
    ) -> StoreResult<(Self, mpsc::UnboundedReceiver<Transfer>)> {
        let store = TradeStore::open(store_path)?;
        let (transfers_tx, transfers_rx) = mpsc::unbounded_channel();
        let state = AppState {
            exchange: Arc::new(RwLock::new(Exchange::new(markets))),
            store: Arc::new(RwLock::new(store)),
            transfers_tx,
        };
        Ok((state, transfers_rx))
    }
}
