use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{CyclePhase, Instrument, TradeAction};

/// Compact per-instrument view published with snapshot events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentView {
    pub token: u32,
    pub symbol: String,
    pub last: Decimal,
    pub peak: Decimal,
    pub change_from_buy: Decimal,
}

impl From<&Instrument> for InstrumentView {
    fn from(inst: &Instrument) -> Self {
        Self {
            token: inst.token,
            symbol: inst.symbol.clone(),
            last: inst.last,
            peak: inst.peak,
            change_from_buy: inst.change_from_buy,
        }
    }
}

/// Domain events emitted by the engine for external publication.
///
/// The transport (websocket push, persistence, etc.) is the subscriber's
/// concern; the engine only broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    InstrumentSnapshot {
        user_id: String,
        cycle: u64,
        instruments: Vec<InstrumentView>,
    },
    Trade {
        user_id: String,
        action: TradeAction,
        symbol: String,
        price: Decimal,
        quantity: i64,
        timestamp: DateTime<Utc>,
        cycle: u64,
    },
    PhaseTransition {
        user_id: String,
        cycle: u64,
        from: CyclePhase,
        to: CyclePhase,
        context: String,
    },
    ParameterUpdated {
        user_id: String,
        scope: String,
        name: String,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_event_serialization() {
        let event = EngineEvent::Trade {
            user_id: "alice".to_string(),
            action: TradeAction::Buy,
            symbol: "X22500CE".to_string(),
            price: dec!(101.5),
            quantity: 75,
            timestamp: Utc::now(),
            cycle: 3,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"trade\""));
        assert!(json.contains("\"action\":\"buy\""));

        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            EngineEvent::Trade { cycle, .. } => assert_eq!(cycle, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
