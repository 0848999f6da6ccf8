//! Trading gateway seam.
//!
//! The broker transport is an external collaborator; the engine only sees
//! this trait. Order flow is the explicit two-step shape: placement returns
//! an acceptance with an order id, the executed price is then read from the
//! order history (last entry's average price).

mod paper;

pub use paper::PaperGateway;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::{executed_price, OrderAccepted, OrderFill};
use crate::error::Result;

/// Broker credentials injected per user; zeroed on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub session_token: String,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            session_token: session_token.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .field("session_token", &"***")
            .finish()
    }
}

#[async_trait]
pub trait TradingGateway: Send + Sync {
    fn is_paper(&self) -> bool;

    async fn place_buy_order(
        &self,
        symbol: &str,
        price: Decimal,
        quantity: i64,
    ) -> Result<OrderAccepted>;

    async fn place_market_sell_order(
        &self,
        symbol: &str,
        price: Decimal,
        quantity: i64,
    ) -> Result<OrderAccepted>;

    async fn order_history(&self, order_id: &str) -> Result<Vec<OrderFill>>;

    /// Executed fill price for an accepted order
    async fn get_fill(&self, order_id: &str) -> Result<Option<Decimal>> {
        let history = self.order_history(order_id).await?;
        Ok(executed_price(&history))
    }
}

/// Build a gateway handle for a credential set.
///
/// The live broker adapter lives outside this crate; every binding here is a
/// paper gateway keyed to the credential holder.
pub fn build_gateway(_creds: &Credentials) -> Arc<dyn TradingGateway> {
    Arc::new(PaperGateway::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacted() {
        let creds = Credentials::new("key", "secret", "token");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***"));
    }
}
