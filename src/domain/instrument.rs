use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{OptionKind, Tick};

/// Signal-pipeline flags tracked per instrument within one cycle
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InstrumentFlags {
    /// Rose at least the discovery threshold above the first observed price
    pub plus3: bool,
    /// Made a qualifying peak and then fell away from it
    pub peak_and_fall: bool,
    /// Printed a fresh high above the previous peak after the fall
    pub calc_ref: bool,
    /// Interim low confirmed after the fall
    pub interim: bool,
    /// Fell into the cancellation band below the first observed price
    pub cancel24: bool,
}

/// One observed tradable instrument, scoped to a single cycle.
///
/// Created on the first tick observed for its token and discarded when the
/// cycle resets. `buy_price` is set at most once per cycle (rebuys re-average
/// it rather than setting it again from scratch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub token: u32,
    pub symbol: String,
    pub kind: OptionKind,
    pub first_price: Decimal,
    pub last: Decimal,
    pub peak: Decimal,
    pub prev_peak: Decimal,
    pub low_since_peak: Decimal,
    pub buy_price: Option<Decimal>,
    pub change_from_buy: Decimal,
    pub position_qty: i64,
    pub flags: InstrumentFlags,
}

impl Instrument {
    /// Create from the first observed tick
    pub fn observe(tick: &Tick, kind: OptionKind) -> Self {
        Self {
            token: tick.token,
            symbol: tick.symbol.clone(),
            kind,
            first_price: tick.last_price,
            last: tick.last_price,
            peak: tick.last_price,
            prev_peak: tick.last_price,
            low_since_peak: tick.last_price,
            buy_price: None,
            change_from_buy: Decimal::ZERO,
            position_qty: 0,
            flags: InstrumentFlags::default(),
        }
    }

    /// Apply a new last price, maintaining peak/low derived metrics
    pub fn apply(&mut self, last: Decimal) {
        self.last = last;

        if last > self.peak {
            self.prev_peak = self.peak;
            self.peak = last;
            self.low_since_peak = last;
        } else if last < self.low_since_peak {
            self.low_since_peak = last;
        }

        if let Some(buy) = self.buy_price {
            self.change_from_buy = last - buy;
        }
    }

    /// Net move since the first observed price
    pub fn change_from_first(&self) -> Decimal {
        self.last - self.first_price
    }

    /// How far the price has fallen from its cycle peak
    pub fn fall_from_peak(&self) -> Decimal {
        self.peak - self.last
    }

    /// Recovery from the lowest print since the peak
    pub fn recovery_from_low(&self) -> Decimal {
        self.last - self.low_since_peak
    }

    /// Whether a position is currently held in this instrument
    pub fn is_held(&self) -> bool {
        self.buy_price.is_some() && self.position_qty > 0
    }

    /// Record a buy fill. Only the first call sets the entry; later fills must
    /// go through [`Instrument::average_in`].
    pub fn mark_bought(&mut self, fill_price: Decimal, quantity: i64) {
        if self.buy_price.is_none() {
            self.buy_price = Some(fill_price);
            self.position_qty = quantity;
            self.change_from_buy = self.last - fill_price;
        }
    }

    /// Average an additional equal-sized fill into the position (rebuy)
    pub fn average_in(&mut self, fill_price: Decimal, quantity: i64) {
        if let Some(entry) = self.buy_price {
            let two = Decimal::from(2);
            self.buy_price = Some((entry + fill_price) / two);
            self.position_qty += quantity;
            self.change_from_buy = self.last - self.buy_price.unwrap_or(entry);
        }
    }

    /// Close out the position
    pub fn mark_sold(&mut self) {
        self.buy_price = None;
        self.position_qty = 0;
        self.change_from_buy = Decimal::ZERO;
    }
}

/// Per-cycle table of observed instruments, keyed by token.
///
/// Ordered storage keeps iteration deterministic so that parallel instances
/// fed identical snapshots make identical decisions.
#[derive(Debug, Clone, Default)]
pub struct InstrumentBook {
    by_token: BTreeMap<u32, Instrument>,
}

impl InstrumentBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a tick: create the instrument on first sight, update otherwise
    pub fn upsert(&mut self, tick: &Tick) {
        if let Some(inst) = self.by_token.get_mut(&tick.token) {
            inst.apply(tick.last_price);
        } else if let Some(kind) = tick.kind() {
            self.by_token.insert(tick.token, Instrument::observe(tick, kind));
        }
    }

    /// Update an already-observed instrument, ignoring unknown tokens
    pub fn update_known(&mut self, tick: &Tick) {
        if let Some(inst) = self.by_token.get_mut(&tick.token) {
            inst.apply(tick.last_price);
        }
    }

    pub fn get(&self, token: u32) -> Option<&Instrument> {
        self.by_token.get(&token)
    }

    pub fn get_mut(&mut self, token: u32) -> Option<&mut Instrument> {
        self.by_token.get_mut(&token)
    }

    /// Iterate in token order
    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.by_token.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Instrument> {
        self.by_token.values_mut()
    }

    /// Drop every instrument outside the accepted cycle universe
    pub fn retain_universe(&mut self, universe: &[u32]) {
        self.by_token.retain(|token, _| universe.contains(token));
    }

    /// Instruments with a live position
    pub fn held(&self) -> impl Iterator<Item = &Instrument> {
        self.by_token.values().filter(|i| i.is_held())
    }

    /// Mark-to-market over all held instruments: sum of (last - buy_price)
    pub fn mark_to_market(&self) -> Decimal {
        self.held()
            .filter_map(|i| i.buy_price.map(|buy| i.last - buy))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Discard all per-cycle state
    pub fn clear(&mut self) {
        self.by_token.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(token: u32, symbol: &str, price: Decimal) -> Tick {
        Tick::new(token, symbol, price)
    }

    #[test]
    fn test_peak_tracking() {
        let mut book = InstrumentBook::new();
        book.upsert(&tick(1, "X22500CE", dec!(100)));
        book.upsert(&tick(1, "X22500CE", dec!(105)));
        book.upsert(&tick(1, "X22500CE", dec!(103)));
        book.upsert(&tick(1, "X22500CE", dec!(101)));

        let inst = book.get(1).unwrap();
        assert_eq!(inst.peak, dec!(105));
        assert_eq!(inst.prev_peak, dec!(100));
        assert_eq!(inst.low_since_peak, dec!(101));
        assert_eq!(inst.fall_from_peak(), dec!(4));
    }

    #[test]
    fn test_recovery_from_low() {
        let mut book = InstrumentBook::new();
        book.upsert(&tick(1, "X22500CE", dec!(100)));
        book.upsert(&tick(1, "X22500CE", dec!(110)));
        book.upsert(&tick(1, "X22500CE", dec!(104)));
        book.upsert(&tick(1, "X22500CE", dec!(106)));

        let inst = book.get(1).unwrap();
        assert_eq!(inst.low_since_peak, dec!(104));
        assert_eq!(inst.recovery_from_low(), dec!(2));
    }

    #[test]
    fn test_buy_price_set_once() {
        let mut inst = Instrument::observe(&tick(1, "X22500CE", dec!(100)), OptionKind::Call);
        inst.mark_bought(dec!(100), 75);
        inst.mark_bought(dec!(120), 75);

        assert_eq!(inst.buy_price, Some(dec!(100)));
        assert_eq!(inst.position_qty, 75);
    }

    #[test]
    fn test_average_in_rebuys() {
        let mut inst = Instrument::observe(&tick(1, "X22500CE", dec!(100)), OptionKind::Call);
        inst.mark_bought(dec!(100), 75);
        inst.apply(dec!(110));
        inst.average_in(dec!(110), 75);

        assert_eq!(inst.buy_price, Some(dec!(105)));
        assert_eq!(inst.position_qty, 150);
        assert_eq!(inst.change_from_buy, dec!(5));
    }

    #[test]
    fn test_mark_to_market() {
        let mut book = InstrumentBook::new();
        book.upsert(&tick(1, "X22500CE", dec!(100)));
        book.upsert(&tick(2, "X22500PE", dec!(80)));

        book.get_mut(1).unwrap().mark_bought(dec!(100), 75);
        book.get_mut(2).unwrap().mark_bought(dec!(80), 75);

        book.update_known(&tick(1, "X22500CE", dec!(107)));
        book.update_known(&tick(2, "X22500PE", dec!(78)));

        // (107 - 100) + (78 - 80) = 5
        assert_eq!(book.mark_to_market(), dec!(5));
    }

    #[test]
    fn test_unknown_symbol_ignored() {
        let mut book = InstrumentBook::new();
        book.upsert(&tick(9, "NIFTY-FUT", dec!(22000)));
        assert!(book.is_empty());
    }

    #[test]
    fn test_retain_universe() {
        let mut book = InstrumentBook::new();
        book.upsert(&tick(1, "X22500CE", dec!(100)));
        book.upsert(&tick(2, "X22500PE", dec!(80)));
        book.upsert(&tick(3, "X23000CE", dec!(60)));

        book.retain_universe(&[1, 2]);
        assert_eq!(book.len(), 2);
        assert!(book.get(3).is_none());
    }
}
