use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{OrderAccepted, OrderFill};
use crate::error::{Result, StraddleError};

use super::TradingGateway;

/// Paper gateway: accepts every order and fills it at the requested price.
///
/// Deterministic by construction, which the twin-instance coordination model
/// depends on in tests and replays.
#[derive(Debug, Default)]
pub struct PaperGateway {
    history: DashMap<String, Vec<OrderFill>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn accept(&self, symbol: &str, price: Decimal, quantity: i64, side: &str) -> OrderAccepted {
        let order_id = Uuid::new_v4().to_string();

        self.history.insert(
            order_id.clone(),
            vec![OrderFill {
                average_price: price,
                quantity,
                filled_at: Utc::now(),
            }],
        );

        debug!("Paper {side}: {quantity} x {symbol} @ {price} ({order_id})");
        OrderAccepted { order_id }
    }

    /// Number of orders placed so far
    pub fn order_count(&self) -> usize {
        self.history.len()
    }
}

#[async_trait]
impl TradingGateway for PaperGateway {
    fn is_paper(&self) -> bool {
        true
    }

    async fn place_buy_order(
        &self,
        symbol: &str,
        price: Decimal,
        quantity: i64,
    ) -> Result<OrderAccepted> {
        if quantity <= 0 {
            return Err(StraddleError::OrderRejected(format!(
                "non-positive quantity {quantity} for {symbol}"
            )));
        }
        Ok(self.accept(symbol, price, quantity, "buy"))
    }

    async fn place_market_sell_order(
        &self,
        symbol: &str,
        price: Decimal,
        quantity: i64,
    ) -> Result<OrderAccepted> {
        if quantity <= 0 {
            return Err(StraddleError::OrderRejected(format!(
                "non-positive quantity {quantity} for {symbol}"
            )));
        }
        Ok(self.accept(symbol, price, quantity, "sell"))
    }

    async fn order_history(&self, order_id: &str) -> Result<Vec<OrderFill>> {
        self.history
            .get(order_id)
            .map(|fills| fills.clone())
            .ok_or_else(|| StraddleError::Gateway(format!("unknown order id {order_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_buy_then_fill_lookup() {
        let gw = PaperGateway::new();

        let accepted = gw
            .place_buy_order("X22500CE", dec!(101.5), 75)
            .await
            .unwrap();
        let fill = gw.get_fill(&accepted.order_id).await.unwrap();

        assert_eq!(fill, Some(dec!(101.5)));
        assert_eq!(gw.order_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let gw = PaperGateway::new();
        assert!(gw.place_buy_order("X22500CE", dec!(100), 0).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_order_history_errors() {
        let gw = PaperGateway::new();
        assert!(gw.order_history("missing").await.is_err());
    }
}
