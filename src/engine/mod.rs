//! Per-user cycle engine: the six-phase strategy state machine.
//!
//! One engine instance consumes tick snapshots for one user, mutates its
//! instrument book and parameter store, places orders through the bound
//! trading gateway, and coordinates with parallel shadow instances of the
//! same logical cycle through the shared fact ledger.

pub mod pipeline;
pub mod scenarios;
pub mod selection;

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StrategyDefaults;
use crate::domain::{
    CyclePhase, EngineEvent, InstrumentBook, InstrumentView, OptionKind, TickSnapshot, TradeAction,
};
use crate::error::{Result, StraddleError};
use crate::gateway::TradingGateway;
use crate::ledger::{
    CompletionMethod, CycleFact, FactLog, PayloadKind, PrebuyLeg, PrebuyPair, PreviousOutcome,
    RebuyNote,
};
use crate::params::{ParamScope, ParamValue, ParameterStore};

use pipeline::{PipelineSignal, SignalPipeline};
use scenarios::{ScenarioInputs, ScenarioOutcome};

/// Per-batch result for one user, aggregated into the dispatcher's report
#[derive(Debug, Clone)]
pub struct UserOutcome {
    pub user_id: String,
    pub cycle: u64,
    pub phase: CyclePhase,
    pub mark_to_market: Decimal,
}

/// Pre-buy observation state: both candidates and their reference prices
#[derive(Debug, Clone)]
struct PrebuyWatch {
    call_token: u32,
    put_token: u32,
    call_ref: Decimal,
    put_ref: Decimal,
}

impl PrebuyWatch {
    fn from_pair(pair: &PrebuyPair) -> Self {
        Self {
            call_token: pair.call.token,
            put_token: pair.put.token,
            call_ref: pair.call.observed,
            put_ref: pair.put.observed,
        }
    }
}

/// The six-phase cycle state machine for one user
pub struct CycleEngine {
    user_id: String,
    /// Distinct per shadow instance; completion quorum counts these
    instance_id: String,
    params: ParameterStore,
    book: InstrumentBook,
    pipeline: SignalPipeline,
    phase: CyclePhase,
    cycle: u64,

    band: Option<Decimal>,
    calc_ref_token: Option<u32>,
    ref3_confirmed: bool,
    prebuy: Option<PrebuyWatch>,

    rebuy_done: bool,
    half_target_seen: bool,
    pre_rebuy_entry: Option<Decimal>,
    completion_method: Option<CompletionMethod>,
    prev_method: Option<CompletionMethod>,
    prev_method_loaded: bool,

    announced_prebuy: bool,
    announced_rebuy: bool,
    announced_method: bool,
    announced_complete: bool,
    announced_prev_method: bool,

    gateway: Option<Arc<dyn TradingGateway>>,
    ledger: Arc<FactLog>,
    events: broadcast::Sender<EngineEvent>,
}

impl CycleEngine {
    pub fn new(
        user_id: impl Into<String>,
        defaults: &StrategyDefaults,
        ledger: Arc<FactLog>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self::with_store(user_id, ParameterStore::with_defaults(defaults), ledger, events)
    }

    /// Build around an existing store (restart carryover: seeded values win
    /// over defaults, which were applied exactly once by the caller)
    pub fn with_store(
        user_id: impl Into<String>,
        params: ParameterStore,
        ledger: Arc<FactLog>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let cycle = params
            .int(ParamScope::Universal, "cycle_number")
            .unwrap_or(1)
            .max(1) as u64;

        Self {
            user_id: user_id.into(),
            instance_id: Uuid::new_v4().to_string(),
            params,
            book: InstrumentBook::new(),
            pipeline: SignalPipeline::new(),
            phase: CyclePhase::Init,
            cycle,
            band: None,
            calc_ref_token: None,
            ref3_confirmed: false,
            prebuy: None,
            rebuy_done: false,
            half_target_seen: false,
            pre_rebuy_entry: None,
            completion_method: None,
            prev_method: None,
            prev_method_loaded: false,
            announced_prebuy: false,
            announced_rebuy: false,
            announced_method: false,
            announced_complete: false,
            announced_prev_method: false,
            gateway: None,
            ledger,
            events,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn book(&self) -> &InstrumentBook {
        &self.book
    }

    /// Bind (or swap) the trading gateway handle
    pub fn bind_gateway(&mut self, gateway: Arc<dyn TradingGateway>) {
        self.gateway = Some(gateway);
    }

    /// Externally patch one parameter; emits a notification on success
    pub fn patch_parameter(
        &mut self,
        scope: ParamScope,
        name: &str,
        value: ParamValue,
    ) -> Result<()> {
        self.params.patch(scope, name, value.clone())?;
        let _ = self.events.send(EngineEvent::ParameterUpdated {
            user_id: self.user_id.clone(),
            scope: scope.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Advance the state machine by one tick batch
    pub async fn process(&mut self, snapshot: &TickSnapshot) -> Result<UserOutcome> {
        if !self.prev_method_loaded {
            self.prev_method = self.load_previous_method().await;
            self.prev_method_loaded = true;
        }

        // One price pass: INIT observes everything, later phases only track
        // the accepted universe
        if self.phase == CyclePhase::Init {
            for tick in snapshot.ticks() {
                self.book.upsert(tick);
            }
        } else {
            for tick in snapshot.ticks() {
                self.book.update_known(tick);
            }
        }

        match self.phase {
            CyclePhase::Init => self.phase_init()?,
            CyclePhase::Update => self.phase_update()?,
            CyclePhase::FinalRef => self.phase_final_ref().await?,
            CyclePhase::Ref3 => self.phase_ref3().await?,
            CyclePhase::Diff10 => self.phase_diff10().await?,
            CyclePhase::NextCycle => self.phase_next_cycle().await?,
        }

        self.emit_snapshot();

        Ok(UserOutcome {
            user_id: self.user_id.clone(),
            cycle: self.cycle,
            phase: self.phase,
            mark_to_market: self.book.mark_to_market(),
        })
    }

    // ==================== phases ====================

    fn phase_init(&mut self) -> Result<()> {
        let anchor = self.params.price(ParamScope::Global, "target_price")?;
        let step = self.params.price(ParamScope::Global, "band_step")?;

        let Some(selection) = selection::select_universe(&self.book, anchor, step) else {
            return Ok(());
        };

        self.book.retain_universe(&selection.tokens);
        self.band = Some(selection.band);

        info!(
            user = %self.user_id,
            cycle = self.cycle,
            band = %selection.band,
            universe = selection.tokens.len(),
            "Cycle universe selected"
        );

        self.transition(
            CyclePhase::Update,
            format!("{} instruments within band {}", selection.tokens.len(), selection.band),
        )
    }

    fn phase_update(&mut self) -> Result<()> {
        match self.pipeline.evaluate(&mut self.book) {
            PipelineSignal::None => Ok(()),
            PipelineSignal::InterimLow => {
                self.transition(CyclePhase::FinalRef, "interim low confirmed".to_string())
            }
            PipelineSignal::CalcRef { token } => {
                self.calc_ref_token = Some(token);
                self.transition(CyclePhase::Ref3, "reference signal fired".to_string())
            }
        }
    }

    async fn phase_final_ref(&mut self) -> Result<()> {
        if self.entry_step().await? {
            self.enter_holding()?;
        }
        Ok(())
    }

    async fn phase_ref3(&mut self) -> Result<()> {
        if !self.ref3_confirmed {
            let Some(token) = self.calc_ref_token else {
                warn!(user = %self.user_id, "REF3 without a flagged instrument; waiting");
                return Ok(());
            };
            let Some(inst) = self.book.get(token) else {
                return Ok(());
            };

            // The flagged instrument must print back at its peak to confirm
            if inst.last < inst.peak {
                return Ok(());
            }
            self.ref3_confirmed = true;
            debug!(user = %self.user_id, symbol = %inst.symbol, "Reference instrument confirmed");
        }

        if self.entry_step().await? {
            self.enter_holding()?;
        }
        Ok(())
    }

    async fn phase_diff10(&mut self) -> Result<()> {
        let mtm = self.book.mark_to_market();
        let target = self.params.price(ParamScope::Global, "target")?;
        let stoploss = self.params.price(ParamScope::Global, "stoploss")?;
        let rebuy_at = self.params.price(ParamScope::Global, "rebuy_at")?;

        if !self.rebuy_done && mtm >= target / Decimal::TWO {
            self.half_target_seen = true;
        }

        let peer_target_hit = self
            .ledger
            .peer_announced(self.cycle, CompletionMethod::TargetHit, &self.instance_id)
            .await;

        let main = self.main_held_token().and_then(|t| self.book.get(t));
        let inputs = ScenarioInputs {
            mtm,
            target,
            stoploss,
            rebuy_done: self.rebuy_done,
            half_target_seen: self.half_target_seen,
            peer_target_hit,
            prev_exit_stoploss: self.prev_method == Some(CompletionMethod::ExitAtStoploss),
            main_last: main.map(|i| i.last),
            main_entry: main.and_then(|i| i.buy_price),
            pre_rebuy_entry: self.pre_rebuy_entry,
            rebuy_at,
        };

        match scenarios::evaluate(&inputs) {
            ScenarioOutcome::Hold => {
                // Mirror a rebuy broadcast by the shadow instance
                if !self.rebuy_done {
                    if let Some(value) =
                        self.ledger.find_payload(self.cycle, PayloadKind::RebuyData).await
                    {
                        match serde_json::from_value::<RebuyNote>(value) {
                            Ok(note) => self.execute_rebuy(Some(note.price)).await?,
                            Err(e) => warn!("Unreadable rebuy broadcast: {e}"),
                        }
                    }
                }
                Ok(())
            }
            ScenarioOutcome::Rebuy => self.execute_rebuy(None).await,
            ScenarioOutcome::SellAll { method, reason } => self.exit_all(method, reason).await,
        }
    }

    async fn phase_next_cycle(&mut self) -> Result<()> {
        if !self.announced_complete {
            let fact = CycleFact::Completion {
                cycle: self.cycle,
                instance: self.instance_id.clone(),
                method: CompletionMethod::Complete,
            };
            if let Err(e) = self.ledger.append(fact).await {
                warn!(user = %self.user_id, "Completion append failed, retrying next tick: {e}");
                return Ok(());
            }
            self.announced_complete = true;
        }

        // Hold position-free until the quorum of shadow instances agrees
        if !self.ledger.cycle_complete(self.cycle).await {
            return Ok(());
        }

        if !self.announced_prev_method {
            if let Some(method) = self.completion_method {
                let fact = CycleFact::Payload {
                    cycle: self.cycle,
                    kind: PayloadKind::PreviousCompletionMethod,
                    payload: serde_json::to_value(PreviousOutcome { method })?,
                };
                if let Err(e) = self.ledger.append(fact).await {
                    warn!(user = %self.user_id, "Outcome append failed, retrying next tick: {e}");
                    return Ok(());
                }
            }
            self.announced_prev_method = true;
        }

        self.reset_cycle()
    }

    // ==================== entry ====================

    /// Run one entry evaluation; true once every required position is held
    async fn entry_step(&mut self) -> Result<bool> {
        let use_prebuy = self.params.flag(ParamScope::Universal, "use_prebuy")?;
        if use_prebuy {
            self.prebuy_step().await
        } else {
            self.direct_buy_step().await
        }
    }

    /// Direct mode: buy the resolved call and put
    async fn direct_buy_step(&mut self) -> Result<bool> {
        let reference = self.params.price(ParamScope::Global, "reference_price")?;
        let quantity = self.params.int(ParamScope::Global, "quantity")?;

        let call = selection::closest_below(&self.book, OptionKind::Call, reference);
        let put = selection::closest_below(&self.book, OptionKind::Put, reference);
        let (Some(call), Some(put)) = (call, put) else {
            debug!(user = %self.user_id, "No candidate at or below reference yet");
            return Ok(false);
        };

        for token in [call, put] {
            let held = self.book.get(token).map(|i| i.is_held()).unwrap_or(false);
            if held {
                continue;
            }
            if let Err(e) = self.buy_instrument(token, quantity).await {
                warn!(user = %self.user_id, "Buy failed, retrying next tick: {e}");
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Pre-buy mode: observe both candidates, commit to one on confirmation
    async fn prebuy_step(&mut self) -> Result<bool> {
        if self.prebuy.is_none() {
            self.resolve_prebuy_pair().await?;
        }
        let Some(watch) = self.prebuy.clone() else {
            return Ok(false);
        };

        let confirm_gain = self.params.price(ParamScope::Global, "confirm_gain")?;
        let confirm_loss = self.params.price(ParamScope::Global, "confirm_loss")?;
        let quantity = self.params.int(ParamScope::Global, "quantity")?;

        let call_change = self
            .book
            .get(watch.call_token)
            .map(|i| i.last - watch.call_ref);
        let put_change = self
            .book
            .get(watch.put_token)
            .map(|i| i.last - watch.put_ref);
        let (Some(call_change), Some(put_change)) = (call_change, put_change) else {
            return Ok(false);
        };

        // Gain on a candidate confirms it; a loss confirms the other one.
        // The call is checked first so parallel instances agree on ties.
        let chosen = if call_change >= confirm_gain {
            Some(watch.call_token)
        } else if put_change >= confirm_gain {
            Some(watch.put_token)
        } else if call_change <= -confirm_loss {
            Some(watch.put_token)
        } else if put_change <= -confirm_loss {
            Some(watch.call_token)
        } else {
            None
        };

        let Some(token) = chosen else { return Ok(false) };

        if let Err(e) = self.buy_instrument(token, quantity).await {
            warn!(user = %self.user_id, "Pre-buy failed, retrying next tick: {e}");
            return Ok(false);
        }
        Ok(true)
    }

    /// Adopt the pair broadcast by the shadow instance, else resolve our own
    /// pair against the reference price and broadcast it.
    async fn resolve_prebuy_pair(&mut self) -> Result<()> {
        if let Some(value) = self
            .ledger
            .find_payload(self.cycle, PayloadKind::PrebuyInstruments)
            .await
        {
            match serde_json::from_value::<PrebuyPair>(value) {
                Ok(pair)
                    if self.book.get(pair.call.token).is_some()
                        && self.book.get(pair.put.token).is_some() =>
                {
                    debug!(user = %self.user_id, "Adopting broadcast pre-buy pair");
                    self.prebuy = Some(PrebuyWatch::from_pair(&pair));
                    return Ok(());
                }
                Ok(_) => warn!("Broadcast pre-buy pair references unknown instruments"),
                Err(e) => warn!("Unreadable pre-buy broadcast: {e}"),
            }
        }

        let reference = self.params.price(ParamScope::Global, "reference_price")?;
        let call = selection::closest_below(&self.book, OptionKind::Call, reference);
        let put = selection::closest_below(&self.book, OptionKind::Put, reference);
        let (Some(call), Some(put)) = (call, put) else {
            return Ok(());
        };

        let leg = |token: u32, book: &InstrumentBook| {
            book.get(token).map(|i| PrebuyLeg {
                token,
                symbol: i.symbol.clone(),
                observed: i.last,
            })
        };
        let (Some(call_leg), Some(put_leg)) = (leg(call, &self.book), leg(put, &self.book)) else {
            return Ok(());
        };

        let pair = PrebuyPair {
            call: call_leg,
            put: put_leg,
        };

        if !self.announced_prebuy {
            let fact = CycleFact::Payload {
                cycle: self.cycle,
                kind: PayloadKind::PrebuyInstruments,
                payload: serde_json::to_value(&pair)?,
            };
            if let Err(e) = self.ledger.append(fact).await {
                warn!(user = %self.user_id, "Pre-buy append failed, retrying next tick: {e}");
                return Ok(());
            }
            self.announced_prebuy = true;
        }

        self.prebuy = Some(PrebuyWatch::from_pair(&pair));
        Ok(())
    }

    /// Save the pre-scenario globals and move into the holding phase
    fn enter_holding(&mut self) -> Result<()> {
        let target = self.params.price(ParamScope::Global, "target")?;
        let stoploss = self.params.price(ParamScope::Global, "stoploss")?;
        let quantity = self.params.int(ParamScope::Global, "quantity")?;

        self.params.set_block("saved_target", ParamValue::Price(target));
        self.params.set_block("saved_stoploss", ParamValue::Price(stoploss));
        self.params.set_block("saved_quantity", ParamValue::Int(quantity));

        self.transition(CyclePhase::Diff10, "positions entered".to_string())
    }

    // ==================== orders ====================

    /// Place a buy and record the executed fill on the instrument.
    /// With trading disabled the fill is booked internally at the last price.
    async fn buy_instrument(&mut self, token: u32, quantity: i64) -> Result<()> {
        let (symbol, price) = match self.book.get(token) {
            Some(inst) => (inst.symbol.clone(), inst.last),
            None => {
                return Err(StraddleError::Internal(format!(
                    "buy for unknown token {token}"
                )))
            }
        };

        let fill = self.execute_buy(&symbol, price, quantity).await?;

        if let Some(inst) = self.book.get_mut(token) {
            inst.mark_bought(fill, quantity);
        }

        info!(
            user = %self.user_id,
            cycle = self.cycle,
            %symbol,
            %fill,
            quantity,
            "Bought"
        );
        self.emit_trade(TradeAction::Buy, &symbol, fill, quantity);
        Ok(())
    }

    /// Gateway buy, returning the executed price
    async fn execute_buy(&self, symbol: &str, price: Decimal, quantity: i64) -> Result<Decimal> {
        if !self.params.flag(ParamScope::Universal, "enable_trading")? {
            return Ok(price);
        }

        let gateway = self
            .gateway
            .clone()
            .ok_or_else(|| StraddleError::GatewayUnbound(self.user_id.clone()))?;

        let accepted = gateway.place_buy_order(symbol, price, quantity).await?;
        let fill = gateway.get_fill(&accepted.order_id).await?;
        Ok(fill.unwrap_or(price))
    }

    /// Gateway market sell, returning the executed price
    async fn execute_sell(&self, symbol: &str, price: Decimal, quantity: i64) -> Result<Decimal> {
        if !self.params.flag(ParamScope::Universal, "enable_trading")? {
            return Ok(price);
        }

        let gateway = self
            .gateway
            .clone()
            .ok_or_else(|| StraddleError::GatewayUnbound(self.user_id.clone()))?;

        let accepted = gateway
            .place_market_sell_order(symbol, price, quantity)
            .await?;
        let fill = gateway.get_fill(&accepted.order_id).await?;
        Ok(fill.unwrap_or(price))
    }

    /// Double the main position at market and re-average the entry
    async fn execute_rebuy(&mut self, price_override: Option<Decimal>) -> Result<()> {
        let Some(token) = self.main_held_token() else {
            return Ok(());
        };
        let (symbol, last, entry) = match self.book.get(token) {
            Some(inst) => (inst.symbol.clone(), inst.last, inst.buy_price),
            None => return Ok(()),
        };
        let Some(entry) = entry else { return Ok(()) };

        let quantity = self.params.int(ParamScope::Global, "quantity")?;
        let price = price_override.unwrap_or(last);

        let fill = match self.execute_buy(&symbol, price, quantity).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(user = %self.user_id, "Rebuy failed, retrying next tick: {e}");
                return Ok(());
            }
        };

        if let Some(inst) = self.book.get_mut(token) {
            inst.average_in(fill, quantity);
        }
        self.pre_rebuy_entry = Some(entry);
        self.rebuy_done = true;

        // Re-averaging halves the distance to both exits
        let target = self.params.price(ParamScope::Global, "target")?;
        let stoploss = self.params.price(ParamScope::Global, "stoploss")?;
        self.params.write(
            ParamScope::Global,
            "target",
            ParamValue::Price(target / Decimal::TWO),
        )?;
        self.params.write(
            ParamScope::Global,
            "stoploss",
            ParamValue::Price(stoploss / Decimal::TWO),
        )?;
        self.params.write(
            ParamScope::Global,
            "quantity",
            ParamValue::Int(quantity * 2),
        )?;

        info!(
            user = %self.user_id,
            cycle = self.cycle,
            %symbol,
            %fill,
            new_entry = %self.book.get(token).and_then(|i| i.buy_price).unwrap_or(entry),
            "Rebuy executed"
        );
        self.emit_trade(TradeAction::Buy, &symbol, fill, quantity);

        if !self.announced_rebuy {
            let fact = CycleFact::Payload {
                cycle: self.cycle,
                kind: PayloadKind::RebuyData,
                payload: serde_json::to_value(RebuyNote {
                    symbol: symbol.clone(),
                    price: fill,
                })?,
            };
            if let Err(e) = self.ledger.append(fact).await {
                warn!(user = %self.user_id, "Rebuy append failed: {e}");
            } else {
                self.announced_rebuy = true;
            }
        }

        Ok(())
    }

    /// Sell every held instrument, restore the saved globals, announce the
    /// outcome, and move to NEXT_CYCLE.
    async fn exit_all(&mut self, method: CompletionMethod, reason: &'static str) -> Result<()> {
        let held: Vec<u32> = self.book.held().map(|i| i.token).collect();

        for token in held {
            let (symbol, last, quantity) = match self.book.get(token) {
                Some(inst) => (inst.symbol.clone(), inst.last, inst.position_qty),
                None => continue,
            };

            match self.execute_sell(&symbol, last, quantity).await {
                Ok(fill) => {
                    if let Some(inst) = self.book.get_mut(token) {
                        inst.mark_sold();
                    }
                    info!(
                        user = %self.user_id,
                        cycle = self.cycle,
                        %symbol,
                        %fill,
                        quantity,
                        reason,
                        "Sold"
                    );
                    self.emit_trade(TradeAction::Sell, &symbol, fill, quantity);
                }
                Err(e) => {
                    // Already-sold legs stay flat; the rest retry next batch
                    warn!(user = %self.user_id, "Sell failed, retrying next tick: {e}");
                    return Ok(());
                }
            }
        }

        self.restore_saved_globals()?;
        self.completion_method = Some(method);

        if !self.announced_method {
            let fact = CycleFact::Completion {
                cycle: self.cycle,
                instance: self.instance_id.clone(),
                method,
            };
            if let Err(e) = self.ledger.append(fact).await {
                warn!(user = %self.user_id, "Method append failed: {e}");
            } else {
                self.announced_method = true;
            }
        }

        self.transition(CyclePhase::NextCycle, reason.to_string())
    }

    fn restore_saved_globals(&mut self) -> Result<()> {
        for (block, name) in [
            ("saved_target", "target"),
            ("saved_stoploss", "stoploss"),
            ("saved_quantity", "quantity"),
        ] {
            if let Some(value) = self.params.take_block(block) {
                self.params.write(ParamScope::Global, name, value)?;
            }
        }
        Ok(())
    }

    // ==================== cycle bookkeeping ====================

    /// The instrument the rebuy logic keys off: the pipeline's main candidate
    /// when held, else the held instrument of its kind, else the first held.
    fn main_held_token(&self) -> Option<u32> {
        if let Some(token) = self.pipeline.main() {
            if self.book.get(token).map(|i| i.is_held()).unwrap_or(false) {
                return Some(token);
            }
            if let Some(kind) = self.book.get(token).map(|i| i.kind) {
                if let Some(held) = self.book.held().find(|i| i.kind == kind) {
                    return Some(held.token);
                }
            }
        }
        self.book.held().next().map(|i| i.token)
    }

    async fn load_previous_method(&self) -> Option<CompletionMethod> {
        if self.cycle <= 1 {
            return None;
        }
        let value = self
            .ledger
            .find_payload(self.cycle - 1, PayloadKind::PreviousCompletionMethod)
            .await?;
        match serde_json::from_value::<PreviousOutcome>(value) {
            Ok(outcome) => Some(outcome.method),
            Err(e) => {
                warn!("Unreadable previous-outcome broadcast: {e}");
                None
            }
        }
    }

    fn reset_cycle(&mut self) -> Result<()> {
        info!(user = %self.user_id, cycle = self.cycle, "Cycle complete, resetting");

        self.transition(CyclePhase::Init, "cycle reset".to_string())?;

        self.book.clear();
        self.pipeline.reset();
        self.band = None;
        self.calc_ref_token = None;
        self.ref3_confirmed = false;
        self.prebuy = None;
        self.rebuy_done = false;
        self.half_target_seen = false;
        self.pre_rebuy_entry = None;
        self.completion_method = None;
        self.prev_method = None;
        self.prev_method_loaded = false;
        self.announced_prebuy = false;
        self.announced_rebuy = false;
        self.announced_method = false;
        self.announced_complete = false;
        self.announced_prev_method = false;
        self.params.clear_blocks();

        self.cycle += 1;
        self.params.write(
            ParamScope::Universal,
            "cycle_number",
            ParamValue::Int(self.cycle as i64),
        )?;

        Ok(())
    }

    fn transition(&mut self, to: CyclePhase, context: String) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(StraddleError::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }

        debug!(
            user = %self.user_id,
            cycle = self.cycle,
            from = %self.phase,
            to = %to,
            context = %context,
            "Phase transition"
        );
        let _ = self.events.send(EngineEvent::PhaseTransition {
            user_id: self.user_id.clone(),
            cycle: self.cycle,
            from: self.phase,
            to,
            context,
        });
        self.phase = to;
        Ok(())
    }

    fn emit_trade(&self, action: TradeAction, symbol: &str, price: Decimal, quantity: i64) {
        let _ = self.events.send(EngineEvent::Trade {
            user_id: self.user_id.clone(),
            action,
            symbol: symbol.to_string(),
            price,
            quantity,
            timestamp: chrono::Utc::now(),
            cycle: self.cycle,
        });
    }

    fn emit_snapshot(&self) {
        if self.book.is_empty() {
            return;
        }
        let _ = self.events.send(EngineEvent::InstrumentSnapshot {
            user_id: self.user_id.clone(),
            cycle: self.cycle,
            instruments: self.book.iter().map(InstrumentView::from).collect(),
        });
    }
}
