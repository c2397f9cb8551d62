use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::SettlementError;
use crate::exchange::Transfer;

/// Moves the base asset between users. Implementations must tolerate the
/// worker's retry policy (a repeated transfer of the same match may reach
/// them after a transient failure).
#[allow(async_fn_in_trait)]
pub trait SettlementSink {
    async fn transfer(
        &self,
        from_user: i64,
        to_user: i64,
        amount: f64,
    ) -> Result<(), SettlementError>;
}

impl<S: SettlementSink> SettlementSink for Arc<S> {
    async fn transfer(
        &self,
        from_user: i64,
        to_user: i64,
        amount: f64,
    ) -> Result<(), SettlementError> {
        (**self).transfer(from_user, to_user, amount).await
    }
}

/// Mutex-guarded balance map. The default sink for tests and for running
/// without a chain endpoint. Balances may go negative; margin checks are
/// not this engine's concern.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<i64, f64>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn balance(&self, user: i64) -> f64 {
        self.balances.lock().await.get(&user).copied().unwrap_or(0.0)
    }
}

impl SettlementSink for InMemoryLedger {
    async fn transfer(
        &self,
        from_user: i64,
        to_user: i64,
        amount: f64,
    ) -> Result<(), SettlementError> {
        let mut balances = self.balances.lock().await;
        *balances.entry(from_user).or_insert(0.0) -= amount;
        *balances.entry(to_user).or_insert(0.0) += amount;
        Ok(())
    }
}

/// Settles against an EVM dev node (anvil-style) over JSON-RPC using
/// `eth_sendTransaction` from unlocked accounts. Per-user account
/// addresses come from configuration; transfers are serialized per sender
/// so nonces never race.
pub struct JsonRpcSettlement {
    http: reqwest::Client,
    endpoint: String,
    accounts: HashMap<i64, String>,
    send_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl JsonRpcSettlement {
    pub fn new(endpoint: impl Into<String>, accounts: HashMap<i64, String>) -> Self {
        JsonRpcSettlement {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            accounts,
            send_locks: Mutex::new(HashMap::new()),
        }
    }

    fn account(&self, user: i64) -> Result<&str, SettlementError> {
        self.accounts
            .get(&user)
            .map(String::as_str)
            .ok_or(SettlementError::UserNotFound(user))
    }

    async fn sender_lock(&self, user: i64) -> Arc<Mutex<()>> {
        self.send_locks
            .lock()
            .await
            .entry(user)
            .or_default()
            .clone()
    }
}

impl SettlementSink for JsonRpcSettlement {
    async fn transfer(
        &self,
        from_user: i64,
        to_user: i64,
        amount: f64,
    ) -> Result<(), SettlementError> {
        let from = self.account(from_user)?.to_owned();
        let to = self.account(to_user)?.to_owned();
        let value = format!("{:#x}", amount.round().max(0.0) as u128);

        let lock = self.sender_lock(from_user).await;
        let _guard = lock.lock().await;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendTransaction",
            "params": [{ "from": from, "to": to, "value": value }],
        });
        let resp: serde_json::Value = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(rpc_err) = resp.get("error") {
            return Err(SettlementError::Rejected(rpc_err.to_string()));
        }
        Ok(())
    }
}

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Drains settlement instructions queued by the matching path. Transfers
/// run strictly outside the exchange lock; the book commit is the source
/// of truth, so a transfer that keeps failing is logged and dropped,
/// never unwound.
pub async fn run_settlement_worker<S: SettlementSink>(
    sink: S,
    mut transfers: mpsc::UnboundedReceiver<Transfer>,
    token: CancellationToken,
) {
    loop {
        let transfer = tokio::select! {
            _ = token.cancelled() => break,
            t = transfers.recv() => match t {
                Some(t) => t,
                None => break,
            },
        };
        settle(&sink, &transfer).await;
    }
    info!("settlement worker stopped");
}

async fn settle<S: SettlementSink>(sink: &S, t: &Transfer) {
    for attempt in 1..=MAX_ATTEMPTS {
        match sink.transfer(t.from_user, t.to_user, t.amount).await {
            Ok(()) => {
                info!(
                    from = t.from_user,
                    to = t.to_user,
                    amount = t.amount,
                    "transfer settled"
                );
                return;
            }
            Err(SettlementError::UserNotFound(user)) => {
                warn!(user, "no settlement account; skipping transfer");
                return;
            }
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(error = %e, attempt, "transfer failed; retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    from = t.from_user,
                    to = t.to_user,
                    amount = t.amount,
                    "transfer abandoned after retries"
                );
            }
        }
    }
}
