use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use clob_exchange::api;
use clob_exchange::client::ExchangeClient;
use clob_exchange::market::Market;
use clob_exchange::market_maker::{MarketMaker, MarketMakerConfig, StaticOracle};
use clob_exchange::settlement::{InMemoryLedger, JsonRpcSettlement, run_settlement_worker};
use clob_exchange::simulate::{self, SimConfig};
use clob_exchange::state::AppState;

#[derive(Parser)]
#[command(name = "clob-exchange")]
#[command(version = "0.1", about = "A spot-exchange CLOB matching engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API with the settlement worker
    Server {
        #[arg(long, default_value_t = 4000)]
        port: u16,

        /// Markets to open books for
        #[arg(long, value_delimiter = ',', default_value = "ETH")]
        markets: Vec<String>,

        /// EVM JSON-RPC endpoint; settlement uses an in-memory ledger
        /// when omitted
        #[arg(long)]
        rpc_url: Option<String>,

        /// Settlement accounts as `user_id=0xaddress`; repeatable
        #[arg(long = "account")]
        accounts: Vec<String>,

        /// Trade history location
        #[arg(long, default_value = "trade_store")]
        store_path: PathBuf,
    },
    /// Run the server plus a market maker and randomized order flow
    Simulate {
        #[arg(long, default_value_t = 4000)]
        port: u16,

        /// Run length in seconds; 0 runs until ctrl-c
        #[arg(long, default_value_t = 30)]
        secs: u64,
    },
}

fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let tc = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tc.cancel();
        }
    });
    token
}

fn parse_accounts(raw: &[String]) -> anyhow::Result<HashMap<i64, String>> {
    raw.iter()
        .map(|entry| {
            let (id, address) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("expected user_id=address, got {entry:?}"))?;
            Ok((id.trim().parse::<i64>()?, address.trim().to_owned()))
        })
        .collect()
}

async fn serve(port: u16, state: AppState, token: CancellationToken) -> anyhow::Result<()> {
    let app = api::router(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    Ok(())
}

async fn wait_for_server(api_base: &str, market: &Market) {
    let client = ExchangeClient::new(api_base.to_owned());
    while client.get_book(market).await.is_err() {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let token = shutdown_token();

    match cli.command {
        Commands::Server {
            port,
            markets,
            rpc_url,
            accounts,
            store_path,
        } => {
            let markets = markets
                .iter()
                .map(|m| Market::new(m))
                .collect::<Result<Vec<_>, _>>()?;
            let (state, transfers_rx) = AppState::new(markets, &store_path)?;

            let worker_token = token.clone();
            let worker = match rpc_url {
                Some(url) => {
                    let accounts = parse_accounts(&accounts)?;
                    tokio::spawn(run_settlement_worker(
                        JsonRpcSettlement::new(url, accounts),
                        transfers_rx,
                        worker_token,
                    ))
                }
                None => tokio::spawn(run_settlement_worker(
                    InMemoryLedger::new(),
                    transfers_rx,
                    worker_token,
                )),
            };

            serve(port, state, token.clone()).await?;
            token.cancel();
            worker.await?;
        }
        Commands::Simulate { port, secs } => {
            let market = Market::new("ETH")?;
            let (state, transfers_rx) =
                AppState::new([market.clone()], &PathBuf::from("trade_store"))?;
            let api_base = format!("http://127.0.0.1:{port}");

            let mut handlers = JoinSet::new();

            let server_token = token.clone();
            let server_state = state.clone();
            handlers.spawn(async move {
                if let Err(e) = serve(port, server_state, server_token).await {
                    tracing::error!(error = %e, "server exited");
                }
            });

            let worker_token = token.clone();
            handlers.spawn(run_settlement_worker(
                InMemoryLedger::new(),
                transfers_rx,
                worker_token,
            ));

            wait_for_server(&api_base, &market).await;

            let maker = MarketMaker::new(
                MarketMakerConfig {
                    user_id: 7,
                    market: market.clone(),
                    order_size: 10.0,
                    min_spread: 2.0,
                    seed_offset: 50.0,
                    price_offset: 1.0,
                    interval: Duration::from_millis(500),
                },
                ExchangeClient::new(api_base.clone()),
                StaticOracle { price: 1_000.0 },
            );
            let mm_token = token.clone();
            handlers.spawn(async move {
                if let Err(e) = maker.run(mm_token).await {
                    tracing::error!(error = %e, "market maker exited");
                }
            });

            let sim_token = token.clone();
            let sim_cfg = SimConfig {
                api_base,
                market,
                run_secs: if secs == 0 { None } else { Some(secs) },
                order_rate_hz: 5.0,
                mean_size: 5.0,
                noise_sigma: 0.5,
                taker_ratio: 0.3,
                user_id: 42,
            };
            handlers.spawn(async move {
                if let Err(e) = simulate::run_simulation(sim_cfg, sim_token.clone()).await {
                    tracing::error!(error = %e, "simulation failed");
                }
                // a bounded run winds the whole process down when done
                sim_token.cancel();
            });

            handlers.join_all().await;
        }
    }
    Ok(())
}
