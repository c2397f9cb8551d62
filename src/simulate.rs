//! Randomized order-flow driver for demos and soak runs. Pure HTTP
//! client of the engine, like every other participant.

use rand::Rng;
use rand_distr::{Distribution, Exp, Exp1, Normal};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{OrderType, PlaceOrderRequest};
use crate::client::ExchangeClient;
use crate::market::Market;

#[derive(Clone)]
pub struct SimConfig {
    pub api_base: String,
    pub market: Market,
    /// `None` runs until cancelled.
    pub run_secs: Option<u64>,
    /// Poisson arrival rate of orders, per second.
    pub order_rate_hz: f64,
    /// Average order size (unit-exponential times this).
    pub mean_size: f64,
    /// N(0, sigma) drift applied to the synthetic mid each tick.
    pub noise_sigma: f64,
    /// Fraction of orders sent as market orders.
    pub taker_ratio: f64,
    pub user_id: i64,
}

/// Fires maker and taker orders at the API with exponential inter-arrival
/// times around a drifting mid. Rejections (including takers bouncing off
/// a thin book) are logged and the flow continues.
pub async fn run_simulation(cfg: SimConfig, token: CancellationToken) -> anyhow::Result<()> {
    let client = ExchangeClient::new(cfg.api_base.clone());

    let inter_arrival = Exp::new(cfg.order_rate_hz).expect("order_rate_hz must be > 0");
    let drift = Normal::new(0.0, cfg.noise_sigma).expect("noise_sigma must be >= 0");
    let mut mid: f64 = 1_000.0;
    let spread = 1.0_f64;
    let start = Instant::now();

    loop {
        if let Some(max_secs) = cfg.run_secs {
            if start.elapsed().as_secs() >= max_secs {
                break;
            }
        }

        let wait_secs: f64 = inter_arrival.sample(&mut rand::rng());
        tokio::select! {
            _ = token.cancelled() => {
                info!("received shutdown; exiting simulation loop");
                break;
            }
            _ = sleep(Duration::from_secs_f64(wait_secs)) => {}
        }

        mid = (mid + drift.sample(&mut rand::rng())).max(1.0);
        let unit: f64 = Exp1.sample(&mut rand::rng());
        let size = (unit * cfg.mean_size).max(0.1);
        let bid = rand::rng().random_bool(0.5);
        let taker = rand::rng().random_bool(cfg.taker_ratio);

        let request = if taker {
            PlaceOrderRequest {
                order_type: OrderType::Market,
                bid,
                size,
                price: None,
                market: cfg.market.code().to_owned(),
                user_id: cfg.user_id,
            }
        } else {
            let price = if bid { mid - spread } else { mid + spread };
            PlaceOrderRequest {
                order_type: OrderType::Limit,
                bid,
                size,
                price: Some(price.max(1.0)),
                market: cfg.market.code().to_owned(),
                user_id: cfg.user_id,
            }
        };

        match client.place_order(&request).await {
            Ok(ack) => info!(
                elapsed = format_args!("{:.1}s", start.elapsed().as_secs_f64()),
                order_id = ack.order_id,
                bid,
                taker,
                size = format_args!("{:.2}", size),
                mid = format_args!("{:.2}", mid),
                "sim order accepted"
            ),
            Err(e) => warn!(error = %e, taker, "sim order rejected"),
        }
    }

    info!("simulation done");
    Ok(())
}
