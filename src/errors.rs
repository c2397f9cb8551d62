use thiserror::Error;

/// Failures reported by the matching core. The book never logs or panics
/// on these; they are its only outward signal.
#[derive(Error, Debug, PartialEq)]
pub enum BookError {
    #[error("insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity { requested: f64, available: f64 },

    #[error("order {0} not found")]
    OrderNotFound(i64),

    #[error("invalid price {0}: must be positive and finite")]
    InvalidPrice(f64),

    #[error("invalid size {0}: must be positive and finite")]
    InvalidSize(f64),
}

#[derive(Error, Debug, PartialEq)]
pub enum ExchangeError {
    #[error("market not found: {0}")]
    MarketNotFound(String),

    #[error(transparent)]
    Book(#[from] BookError),
}

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("user {0} has no settlement account")]
    UserNotFound(i64),

    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Errors from the typed HTTP client used by the market maker and the
/// simulator.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("exchange rejected request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum MarketMakerError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("venue error: {0}")]
    Venue(String),

    #[error("oracle unavailable: {0}")]
    Oracle(String),
}
