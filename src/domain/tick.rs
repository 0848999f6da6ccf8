use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Option contract kind, derived from the trading symbol suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionKind {
    /// Call option (CE)
    Call,
    /// Put option (PE)
    Put,
}

impl OptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKind::Call => "CE",
            OptionKind::Put => "PE",
        }
    }

    /// The complementary kind (a cycle holds one of each)
    pub fn complement(&self) -> OptionKind {
        match self {
            OptionKind::Call => OptionKind::Put,
            OptionKind::Put => OptionKind::Call,
        }
    }

    /// Derive the kind from a trading symbol suffix (e.g. "NIFTY24O2422500CE")
    pub fn from_symbol(symbol: &str) -> Option<OptionKind> {
        let upper = symbol.trim().to_ascii_uppercase();
        if upper.ends_with("CE") {
            Some(OptionKind::Call)
        } else if upper.ends_with("PE") {
            Some(OptionKind::Put)
        } else {
            None
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One price update for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    #[serde(rename = "instrument_token")]
    pub token: u32,
    pub symbol: String,
    pub last_price: Decimal,
}

impl Tick {
    pub fn new(token: u32, symbol: impl Into<String>, last_price: Decimal) -> Self {
        Self {
            token,
            symbol: symbol.into(),
            last_price,
        }
    }

    /// Option kind derived from the symbol, if recognizable
    pub fn kind(&self) -> Option<OptionKind> {
        OptionKind::from_symbol(&self.symbol)
    }

    /// Absolute deviation of the last price from an anchor price
    pub fn deviation_from(&self, anchor: Decimal) -> Decimal {
        (self.last_price - anchor).abs()
    }
}

/// Immutable snapshot of one tick batch.
///
/// Captured once per dispatch so every user observes identical prices even if
/// the caller mutates its own tick objects afterwards. Cloning the snapshot is
/// cheap (shared storage).
#[derive(Debug, Clone)]
pub struct TickSnapshot {
    taken_at: DateTime<Utc>,
    ticks: Arc<[Tick]>,
}

impl TickSnapshot {
    /// Deep-copy a batch into an immutable snapshot
    pub fn capture(batch: &[Tick]) -> Self {
        Self {
            taken_at: Utc::now(),
            ticks: batch.to_vec().into(),
        }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}
