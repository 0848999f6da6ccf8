//! Sequential signal-filter pipeline run over the cycle universe during the
//! UPDATE phase.
//!
//! The pipeline promotes one instrument to *main* candidate once it rises
//! clear of its first observed price, pairs it with an *opposite* candidate
//! of the complementary kind, and then waits for one of two confirmations on
//! the main candidate: an interim low (fall from the peak followed by a
//! recovery) or a reference signal (a fresh high above the previous peak).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::domain::InstrumentBook;

/// Rise from the first observed price that promotes a candidate
const DISCOVERY_RISE: Decimal = dec!(3.0);
/// Cancellation band: a fall this far below the first price drops a candidate
const CANCEL_BAND_LOW: Decimal = dec!(2.0);
const CANCEL_BAND_HIGH: Decimal = dec!(4.0);
/// Fall from the peak that arms the interim-low watch
const PEAK_FALL_CONFIRM: Decimal = dec!(1.0);
/// Recovery from the post-peak low that confirms the interim low
const INTERIM_RECOVERY: Decimal = dec!(0.5);

/// Outcome of one pipeline evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineSignal {
    None,
    /// Interim low confirmed on the main candidate
    InterimLow,
    /// Reference signal fired instead: a fresh high above the previous peak
    CalcRef { token: u32 },
}

/// Candidate tracker, reset at every cycle boundary
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalPipeline {
    main: Option<u32>,
    opposite: Option<u32>,
}

impl SignalPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn main(&self) -> Option<u32> {
        self.main
    }

    pub fn opposite(&self) -> Option<u32> {
        self.opposite
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Run one evaluation over the universe. Flag mutations stay on the
    /// instruments so discarded candidates are not re-promoted.
    pub fn evaluate(&mut self, book: &mut InstrumentBook) -> PipelineSignal {
        self.cancel_dropped_candidate(book);

        if self.main.is_none() {
            self.discover_candidates(book);
        }

        let Some(token) = self.main else {
            return PipelineSignal::None;
        };
        let Some(inst) = book.get_mut(token) else {
            self.reset();
            return PipelineSignal::None;
        };

        if inst.flags.plus3
            && !inst.flags.peak_and_fall
            && inst.peak >= inst.first_price + DISCOVERY_RISE
            && inst.fall_from_peak() >= PEAK_FALL_CONFIRM
        {
            inst.flags.peak_and_fall = true;
            debug!("{} peaked at {} and fell to {}", inst.symbol, inst.peak, inst.last);
        }

        if inst.flags.peak_and_fall {
            // A print back at or above the peak outranks the recovery check
            if inst.last >= inst.peak && inst.last > inst.prev_peak {
                inst.flags.calc_ref = true;
                return PipelineSignal::CalcRef { token };
            }

            if inst.recovery_from_low() >= INTERIM_RECOVERY {
                inst.flags.interim = true;
                return PipelineSignal::InterimLow;
            }
        }

        PipelineSignal::None
    }

    /// Drop the main candidate if it fell into the cancellation band
    fn cancel_dropped_candidate(&mut self, book: &mut InstrumentBook) {
        let Some(token) = self.main else { return };
        let Some(inst) = book.get_mut(token) else {
            self.reset();
            return;
        };

        let fall = inst.first_price - inst.last;
        if fall >= CANCEL_BAND_LOW && fall <= CANCEL_BAND_HIGH {
            inst.flags.cancel24 = true;
            inst.flags.plus3 = false;
            inst.flags.peak_and_fall = false;
            debug!("{} cancelled: {} below first price", inst.symbol, fall);
            self.main = None;
            self.opposite = None;
        }
    }

    /// Promote the first instrument clear of its first price; pair it with
    /// the least-moved instrument of the complementary kind.
    fn discover_candidates(&mut self, book: &mut InstrumentBook) {
        let candidate = book
            .iter()
            .find(|inst| !inst.flags.cancel24 && inst.change_from_first() >= DISCOVERY_RISE)
            .map(|inst| (inst.token, inst.kind));

        let Some((token, kind)) = candidate else { return };

        if let Some(inst) = book.get_mut(token) {
            inst.flags.plus3 = true;
            debug!("Main candidate: {} (+{})", inst.symbol, inst.change_from_first());
        }
        self.main = Some(token);

        self.opposite = book
            .iter()
            .filter(|inst| inst.kind == kind.complement() && !inst.flags.cancel24)
            .min_by_key(|inst| (inst.change_from_first().abs(), inst.token))
            .map(|inst| inst.token);
    }
}
