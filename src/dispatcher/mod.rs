//! Tick dispatcher: bounded-concurrency fan-out of tick batches.
//!
//! Each dispatch takes one immutable snapshot of the batch and fans it out to
//! every active user's processor. A global permit pool caps the number of
//! in-flight per-user jobs; excess jobs queue FIFO and are released as
//! permits free up. Failures (errors and panics alike) are contained to the
//! affected user and surface in the batch report.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::domain::{Tick, TickSnapshot};
use crate::engine::UserOutcome;
use crate::error::Result;

/// Per-user seam the dispatcher fans out to. The implementation is expected
/// to serialize per-user access so no two batches overlap for one user.
#[async_trait]
pub trait UserProcessor: Send + Sync {
    async fn process_user(&self, user_id: &str, snapshot: &TickSnapshot) -> Result<UserOutcome>;
}

/// Point-in-time dispatcher statistics
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub total_processed: u64,
    pub total_errors: u64,
    pub avg_latency_ms: f64,
    pub queued: usize,
    pub active: usize,
}

#[derive(Default)]
struct DispatchCounters {
    total_processed: AtomicU64,
    total_errors: AtomicU64,
    latency_sum_ms: AtomicU64,
    queued: AtomicUsize,
    active: AtomicUsize,
}

/// Decrements the active-worker count even if the job panics
struct ActiveToken {
    counters: Arc<DispatchCounters>,
}

impl ActiveToken {
    fn enter(counters: Arc<DispatchCounters>) -> Self {
        counters.queued.fetch_sub(1, Ordering::Relaxed);
        counters.active.fetch_add(1, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for ActiveToken {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Result row for one user in one batch
#[derive(Debug, Clone)]
pub struct UserReport {
    pub user_id: String,
    pub outcome: Option<UserOutcome>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl UserReport {
    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of one dispatched batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_size: usize,
    pub processed: usize,
    pub errors: usize,
    pub elapsed_ms: u64,
    pub users: Vec<UserReport>,
}

/// Fans tick batches out to per-user jobs under a global concurrency cap
pub struct TickDispatcher {
    permits: Arc<Semaphore>,
    counters: Arc<DispatchCounters>,
}

impl TickDispatcher {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Dispatch one batch to every active user and collect the report.
    ///
    /// The snapshot is taken once before fan-out; every user observes the
    /// same prices regardless of later mutation of `batch` by the caller.
    pub async fn dispatch(
        &self,
        batch: &[Tick],
        active_user_ids: &[String],
        processor: Arc<dyn UserProcessor>,
    ) -> BatchReport {
        let started = Instant::now();
        let snapshot = TickSnapshot::capture(batch);

        let mut jobs: JoinSet<UserReport> = JoinSet::new();
        let mut names: HashMap<tokio::task::Id, String> = HashMap::new();

        for user_id in active_user_ids {
            let permits = Arc::clone(&self.permits);
            let counters = Arc::clone(&self.counters);
            let processor = Arc::clone(&processor);
            let snapshot = snapshot.clone();
            let user_id = user_id.clone();
            let label = user_id.clone();

            let handle = jobs.spawn(async move {
                counters.queued.fetch_add(1, Ordering::Relaxed);
                // The semaphore is fair, so queued jobs release in FIFO order
                let _permit = permits.acquire_owned().await.ok();
                let _active = ActiveToken::enter(Arc::clone(&counters));

                let start = Instant::now();
                let result = processor.process_user(&user_id, &snapshot).await;
                let latency_ms = start.elapsed().as_millis() as u64;

                counters.total_processed.fetch_add(1, Ordering::Relaxed);
                counters
                    .latency_sum_ms
                    .fetch_add(latency_ms, Ordering::Relaxed);

                match result {
                    Ok(outcome) => UserReport {
                        user_id,
                        outcome: Some(outcome),
                        error: None,
                        latency_ms,
                    },
                    Err(e) => {
                        counters.total_errors.fetch_add(1, Ordering::Relaxed);
                        error!(user = %user_id, "Processing failed: {e}");
                        UserReport {
                            user_id,
                            outcome: None,
                            error: Some(e.to_string()),
                            latency_ms,
                        }
                    }
                }
            });
            names.insert(handle.id(), label);
        }

        let mut users = Vec::with_capacity(active_user_ids.len());
        while let Some(joined) = jobs.join_next_with_id().await {
            match joined {
                Ok((_, report)) => users.push(report),
                Err(join_err) => {
                    // A panicked job is reported like any other per-user
                    // failure and never aborts its siblings
                    let user_id = names
                        .get(&join_err.id())
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string());
                    self.counters.total_processed.fetch_add(1, Ordering::Relaxed);
                    self.counters.total_errors.fetch_add(1, Ordering::Relaxed);
                    error!(user = %user_id, "Processing panicked: {join_err}");
                    users.push(UserReport {
                        user_id,
                        outcome: None,
                        error: Some(join_err.to_string()),
                        latency_ms: 0,
                    });
                }
            }
        }

        let errors = users.iter().filter(|u| u.is_err()).count();
        let report = BatchReport {
            batch_size: snapshot.len(),
            processed: users.len(),
            errors,
            elapsed_ms: started.elapsed().as_millis() as u64,
            users,
        };

        debug!(
            processed = report.processed,
            errors = report.errors,
            elapsed_ms = report.elapsed_ms,
            "Batch dispatched"
        );
        report
    }

    /// Current statistics; never blocks dispatch
    pub fn stats(&self) -> DispatchStats {
        let processed = self.counters.total_processed.load(Ordering::Relaxed);
        let latency_sum = self.counters.latency_sum_ms.load(Ordering::Relaxed);

        DispatchStats {
            total_processed: processed,
            total_errors: self.counters.total_errors.load(Ordering::Relaxed),
            avg_latency_ms: if processed == 0 {
                0.0
            } else {
                latency_sum as f64 / processed as f64
            },
            queued: self.counters.queued.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CyclePhase;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, Duration};

    /// Records the peak number of concurrently running jobs
    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl UserProcessor for ConcurrencyProbe {
        async fn process_user(
            &self,
            user_id: &str,
            _snapshot: &TickSnapshot,
        ) -> Result<UserOutcome> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            Ok(UserOutcome {
                user_id: user_id.to_string(),
                cycle: 1,
                phase: CyclePhase::Init,
                mark_to_market: Decimal::ZERO,
            })
        }
    }

    struct FailSome;

    #[async_trait]
    impl UserProcessor for FailSome {
        async fn process_user(
            &self,
            user_id: &str,
            _snapshot: &TickSnapshot,
        ) -> Result<UserOutcome> {
            if user_id.starts_with("bad") {
                return Err(crate::error::StraddleError::Internal("boom".to_string()));
            }
            Ok(UserOutcome {
                user_id: user_id.to_string(),
                cycle: 1,
                phase: CyclePhase::Init,
                mark_to_market: Decimal::ZERO,
            })
        }
    }

    fn users(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user-{i}")).collect()
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_cap() {
        let dispatcher = TickDispatcher::new(3);
        let probe = Arc::new(ConcurrencyProbe {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let batch = vec![Tick::new(1, "X22400CE", dec!(100))];
        let report = dispatcher.dispatch(&batch, &users(20), probe.clone()).await;

        assert_eq!(report.processed, 20);
        assert_eq!(report.errors, 0);
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let dispatcher = TickDispatcher::new(4);
        let ids: Vec<String> = vec![
            "good-1".into(),
            "bad-1".into(),
            "good-2".into(),
            "bad-2".into(),
            "good-3".into(),
        ];

        let batch = vec![Tick::new(1, "X22400CE", dec!(100))];
        let report = dispatcher.dispatch(&batch, &ids, Arc::new(FailSome)).await;

        assert_eq!(report.processed, 5);
        assert_eq!(report.errors, 2);

        let good: Vec<&UserReport> = report.users.iter().filter(|u| !u.is_err()).collect();
        assert_eq!(good.len(), 3);
        assert!(good.iter().all(|u| u.outcome.is_some()));
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let dispatcher = TickDispatcher::new(2);
        let batch = vec![Tick::new(1, "X22400CE", dec!(100))];

        dispatcher
            .dispatch(&batch, &users(4), Arc::new(FailSome))
            .await;
        dispatcher
            .dispatch(&batch, &["bad-1".to_string()], Arc::new(FailSome))
            .await;

        let stats = dispatcher.stats();
        assert_eq!(stats.total_processed, 5);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.active, 0);
    }
}
