//! Shadow-instance coordination: two engines working the same logical cycle
//! agree on completion and share cycle-scoped facts through the ledger only.

use std::sync::Arc;

use rust_decimal_macros::dec;
use tokio::sync::broadcast;

use straddle::config::AppConfig;
use straddle::domain::{CyclePhase, Tick, TickSnapshot};
use straddle::engine::CycleEngine;
use straddle::gateway::PaperGateway;
use straddle::ledger::{CompletionMethod, FactLog, PayloadKind, PrebuyPair};
use straddle::params::{ParamScope, ParamValue};

fn shadow_pair(ledger: Arc<FactLog>) -> (CycleEngine, CycleEngine) {
    let defaults = AppConfig::default_config().strategy;
    let (events, _) = broadcast::channel(1024);

    let mut a = CycleEngine::new("alice", &defaults, ledger.clone(), events.clone());
    let mut b = CycleEngine::new("alice", &defaults, ledger, events);
    a.bind_gateway(Arc::new(PaperGateway::new()));
    b.bind_gateway(Arc::new(PaperGateway::new()));
    (a, b)
}

fn batch(prices: &[(u32, &str, rust_decimal::Decimal)]) -> TickSnapshot {
    let ticks: Vec<Tick> = prices
        .iter()
        .map(|(token, symbol, price)| Tick::new(*token, *symbol, *price))
        .collect();
    TickSnapshot::capture(&ticks)
}

/// INIT through entry: call promoted, falls from its peak, recovers
fn entry_batches() -> Vec<TickSnapshot> {
    vec![
        batch(&[(1, "X22400CE", dec!(195)), (2, "X22400PE", dec!(190))]),
        batch(&[(1, "X22400CE", dec!(199)), (2, "X22400PE", dec!(190))]),
        batch(&[(1, "X22400CE", dec!(197.5)), (2, "X22400PE", dec!(190))]),
        batch(&[(1, "X22400CE", dec!(198)), (2, "X22400PE", dec!(190))]),
        batch(&[(1, "X22400CE", dec!(198)), (2, "X22400PE", dec!(190))]),
    ]
}

#[tokio::test]
async fn shadow_instances_reach_quorum_and_reset_together() {
    let ledger = Arc::new(FactLog::in_memory());
    let (mut a, mut b) = shadow_pair(ledger.clone());

    for snapshot in entry_batches() {
        a.process(&snapshot).await.unwrap();
        b.process(&snapshot).await.unwrap();
    }
    assert_eq!(a.phase(), CyclePhase::Diff10);
    assert_eq!(b.phase(), CyclePhase::Diff10);

    // Combined MTM reaches the target: both exit the same tick
    let exit = batch(&[(1, "X22400CE", dec!(205)), (2, "X22400PE", dec!(193))]);
    a.process(&exit).await.unwrap();
    b.process(&exit).await.unwrap();
    assert_eq!(a.phase(), CyclePhase::NextCycle);
    assert_eq!(b.phase(), CyclePhase::NextCycle);

    // First instance to run NEXT_CYCLE logs COMPLETE but must wait: only one
    // distinct instance id so far
    a.process(&exit).await.unwrap();
    assert_eq!(a.phase(), CyclePhase::NextCycle);
    assert_eq!(a.cycle(), 1);
    assert_eq!(ledger.completion_count(1).await, 1);

    // Second instance completes: quorum met, it resets immediately
    b.process(&exit).await.unwrap();
    assert_eq!(b.phase(), CyclePhase::Init);
    assert_eq!(b.cycle(), 2);

    // And the first follows on its next tick
    a.process(&exit).await.unwrap();
    assert_eq!(a.phase(), CyclePhase::Init);
    assert_eq!(a.cycle(), 2);

    // The cycle outcome was broadcast for the next cycle's scenario keying
    let outcome = ledger
        .find_payload(1, PayloadKind::PreviousCompletionMethod)
        .await
        .expect("previous outcome broadcast");
    assert!(outcome.to_string().contains("TARGET_HIT"));
}

#[tokio::test]
async fn prebuy_pair_is_broadcast_and_adopted() {
    let ledger = Arc::new(FactLog::in_memory());
    let (mut a, mut b) = shadow_pair(ledger.clone());

    for engine in [&mut a, &mut b] {
        engine
            .patch_parameter(ParamScope::Universal, "use_prebuy", ParamValue::Bool(true))
            .unwrap();
    }

    for snapshot in entry_batches() {
        a.process(&snapshot).await.unwrap();
        b.process(&snapshot).await.unwrap();
    }

    // Both observe, neither has committed capital yet
    assert_eq!(a.phase(), CyclePhase::FinalRef);
    assert_eq!(b.phase(), CyclePhase::FinalRef);
    assert_eq!(a.book().held().count(), 0);

    // Exactly one pair broadcast, readable by both
    let pair = ledger
        .find_payload(1, PayloadKind::PrebuyInstruments)
        .await
        .expect("pre-buy pair broadcast");
    let pair: PrebuyPair = serde_json::from_value(pair).unwrap();
    assert_eq!(pair.call.token, 1);
    assert_eq!(pair.put.token, 2);
    assert_eq!(pair.call.observed, dec!(198));

    // The call gains the confirmation level over its observation price:
    // both instances buy the call, and only the call
    let confirm = batch(&[(1, "X22400CE", dec!(201)), (2, "X22400PE", dec!(190))]);
    a.process(&confirm).await.unwrap();
    b.process(&confirm).await.unwrap();

    for engine in [&a, &b] {
        assert_eq!(engine.phase(), CyclePhase::Diff10);
        let held: Vec<u32> = engine.book().held().map(|i| i.token).collect();
        assert_eq!(held, vec![1]);
    }
}

#[tokio::test]
async fn peer_target_hit_pulls_the_slower_instance_out() {
    let ledger = Arc::new(FactLog::in_memory());
    let (mut a, mut b) = shadow_pair(ledger.clone());

    for snapshot in entry_batches() {
        a.process(&snapshot).await.unwrap();
        b.process(&snapshot).await.unwrap();
    }

    // Only instance A sees the winning print (e.g. B's feed stalled short of
    // it); A exits at target and announces TARGET_HIT
    let winning = batch(&[(1, "X22400CE", dec!(205)), (2, "X22400PE", dec!(193))]);
    a.process(&winning).await.unwrap();
    assert_eq!(a.phase(), CyclePhase::NextCycle);
    assert!(
        ledger
            .peer_announced(1, CompletionMethod::TargetHit, "nobody")
            .await
    );

    // B's own prices are nowhere near the target, but the ledger fact alone
    // makes it exit
    let stale = batch(&[(1, "X22400CE", dec!(199)), (2, "X22400PE", dec!(190))]);
    b.process(&stale).await.unwrap();
    assert_eq!(b.phase(), CyclePhase::NextCycle);
    assert_eq!(b.book().held().count(), 0);
}

#[tokio::test]
async fn rebuy_broadcast_is_mirrored_at_the_same_price() {
    let ledger = Arc::new(FactLog::in_memory());
    let (mut a, mut b) = shadow_pair(ledger.clone());

    // Big target so the rebuy fires before the target does
    for engine in [&mut a, &mut b] {
        engine
            .patch_parameter(ParamScope::Global, "target", ParamValue::Price(dec!(50)))
            .unwrap();
    }

    let setup = vec![
        batch(&[(1, "X22400CE", dec!(100)), (2, "X22400PE", dec!(190))]),
        batch(&[(1, "X22400CE", dec!(104)), (2, "X22400PE", dec!(190))]),
        batch(&[(1, "X22400CE", dec!(102.5)), (2, "X22400PE", dec!(190))]),
        batch(&[(1, "X22400CE", dec!(103)), (2, "X22400PE", dec!(190))]),
        batch(&[(1, "X22400CE", dec!(100)), (2, "X22400PE", dec!(190))]),
    ];
    for snapshot in setup {
        a.process(&snapshot).await.unwrap();
        b.process(&snapshot).await.unwrap();
    }
    assert_eq!(a.phase(), CyclePhase::Diff10);

    // Instance A sees the rise to entry + rebuy_at and rebuys at 110
    let rise = batch(&[(1, "X22400CE", dec!(110)), (2, "X22400PE", dec!(190))]);
    a.process(&rise).await.unwrap();
    assert_eq!(a.book().get(1).unwrap().buy_price, Some(dec!(105)));

    // Instance B's feed never printed 110, but it mirrors the broadcast
    // rebuy at the broadcast price
    let stale = batch(&[(1, "X22400CE", dec!(108)), (2, "X22400PE", dec!(190))]);
    b.process(&stale).await.unwrap();

    let call = b.book().get(1).unwrap();
    assert_eq!(call.buy_price, Some(dec!(105)));
    assert_eq!(call.position_qty, 150);
}
