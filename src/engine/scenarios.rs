//! DIFF10 exit/rebuy scenario table.
//!
//! Scenarios are mutually exclusive and evaluated in fixed priority order on
//! every tick batch; the first satisfied scenario wins. The evaluation is a
//! pure function of the inputs so both parallel instances, fed identical
//! snapshots and ledger state, pick the same scenario on the same tick.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::ledger::CompletionMethod;

/// Net-casting tolerance around the post-rebuy target midpoint
pub const NET_CAST_TOLERANCE: Decimal = dec!(0.5);

/// Deeper-loss variant of the half-target guard. Present in the table but
/// not enabled; flipping this constant activates it.
const DEEP_LOSS_EXIT_ENABLED: bool = false;

/// Everything the scenario table looks at for one evaluation
#[derive(Debug, Clone)]
pub struct ScenarioInputs {
    /// Mark-to-market: sum of (last - buy_price) over held instruments
    pub mtm: Decimal,
    /// Current target (already halved after a rebuy)
    pub target: Decimal,
    /// Current stop-loss magnitude (already halved after a rebuy)
    pub stoploss: Decimal,
    pub rebuy_done: bool,
    /// MTM reached half of the target at some point this cycle
    pub half_target_seen: bool,
    /// Another instance announced TARGET_HIT for this cycle
    pub peer_target_hit: bool,
    /// The previous cycle exited at stop-loss
    pub prev_exit_stoploss: bool,
    /// Last price of the main held instrument
    pub main_last: Option<Decimal>,
    /// Current (averaged) entry of the main held instrument
    pub main_entry: Option<Decimal>,
    /// Entry before the rebuy re-averaged it
    pub pre_rebuy_entry: Option<Decimal>,
    /// Rise above entry that triggers the rebuy
    pub rebuy_at: Decimal,
}

/// Action selected by the scenario table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Hold,
    /// Double the position at market and re-average the entry
    Rebuy,
    /// Close every held instrument at market
    SellAll {
        method: CompletionMethod,
        reason: &'static str,
    },
}

pub fn evaluate(inp: &ScenarioInputs) -> ScenarioOutcome {
    // 1. Target reached outright
    if !inp.rebuy_done && inp.mtm >= inp.target {
        return ScenarioOutcome::SellAll {
            method: CompletionMethod::TargetHit,
            reason: "target reached",
        };
    }

    // 2. Post-rebuy target (the halved midpoint), net-cast by half a point
    if inp.rebuy_done && inp.mtm >= inp.target - NET_CAST_TOLERANCE {
        return ScenarioOutcome::SellAll {
            method: CompletionMethod::TargetHit,
            reason: "post-rebuy target reached",
        };
    }

    // 3. A parallel instance already hit target this cycle
    if inp.peer_target_hit {
        return ScenarioOutcome::SellAll {
            method: CompletionMethod::TargetHit,
            reason: "peer instance hit target",
        };
    }

    // 4. Reached half the target, then gave all of it back
    if !inp.rebuy_done && inp.half_target_seen && inp.mtm <= Decimal::ZERO {
        return ScenarioOutcome::SellAll {
            method: CompletionMethod::ExitAtCost,
            reason: "fell back to cost after half target",
        };
    }
    if DEEP_LOSS_EXIT_ENABLED
        && inp.half_target_seen
        && inp.mtm <= -(inp.stoploss / Decimal::TWO)
    {
        return ScenarioOutcome::SellAll {
            method: CompletionMethod::ExitAtStoploss,
            reason: "deep loss after half target",
        };
    }

    // 5. Stop-loss, tightened when the previous cycle also stopped out
    let effective_stop = if inp.prev_exit_stoploss {
        inp.stoploss / Decimal::TWO
    } else {
        inp.stoploss
    };
    if inp.mtm <= -effective_stop {
        return ScenarioOutcome::SellAll {
            method: CompletionMethod::ExitAtStoploss,
            reason: "stop-loss",
        };
    }

    // 6. Rebuy once the main leg rises rebuy_at above its entry
    if !inp.rebuy_done {
        if let (Some(last), Some(entry)) = (inp.main_last, inp.main_entry) {
            if last >= entry + inp.rebuy_at {
                return ScenarioOutcome::Rebuy;
            }
        }
    }

    // 7. Post-rebuy revert to the original cost basis
    if inp.rebuy_done {
        if let (Some(last), Some(entry)) = (inp.main_last, inp.pre_rebuy_entry) {
            if last <= entry {
                return ScenarioOutcome::SellAll {
                    method: CompletionMethod::ExitAtCost,
                    reason: "reverted to pre-rebuy cost",
                };
            }
        }
    }

    ScenarioOutcome::Hold
}
