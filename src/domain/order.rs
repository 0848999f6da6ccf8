use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction for the simplified trade event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "buy"),
            TradeAction::Sell => write!(f, "sell"),
        }
    }
}

/// First step of the two-step order flow: the gateway accepted the order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAccepted {
    pub order_id: String,
}

/// One fill row from the gateway's order history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub average_price: Decimal,
    pub quantity: i64,
    pub filled_at: DateTime<Utc>,
}

/// Executed price of an order: the last history entry's average price
pub fn executed_price(history: &[OrderFill]) -> Option<Decimal> {
    history.last().map(|fill| fill.average_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_executed_price_uses_last_entry() {
        let history = vec![
            OrderFill {
                average_price: dec!(101.5),
                quantity: 25,
                filled_at: Utc::now(),
            },
            OrderFill {
                average_price: dec!(101.8),
                quantity: 75,
                filled_at: Utc::now(),
            },
        ];

        assert_eq!(executed_price(&history), Some(dec!(101.8)));
        assert_eq!(executed_price(&[]), None);
    }
}
