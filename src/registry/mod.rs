//! Strategy registry: one engine (plus parameter store and gateway handle)
//! per user id.
//!
//! Instances are created lazily on the first tick or command for a user and
//! destroyed only on explicit removal. A per-instance mutex serializes all
//! access, which gives the dispatcher its per-user ordering guarantee: no two
//! batches overlap for the same user.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use crate::config::AppConfig;
use crate::dispatcher::UserProcessor;
use crate::domain::{EngineEvent, TickSnapshot};
use crate::engine::{CycleEngine, UserOutcome};
use crate::error::Result;
use crate::gateway::{build_gateway, Credentials};
use crate::ledger::FactLog;
use crate::params::{ParamScope, ParamValue};

/// One user's strategy instance behind its serialization lock
pub struct UserSlot {
    engine: Mutex<CycleEngine>,
}

impl UserSlot {
    /// Lock the engine for direct inspection (tests, admin queries)
    pub async fn engine(&self) -> tokio::sync::MutexGuard<'_, CycleEngine> {
        self.engine.lock().await
    }
}

/// Creates and owns per-user strategy instances
pub struct StrategyRegistry {
    users: DashMap<String, Arc<UserSlot>>,
    config: AppConfig,
    ledger_dir: Option<PathBuf>,
    events: broadcast::Sender<EngineEvent>,
}

impl StrategyRegistry {
    pub fn new(config: AppConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        let ledger_dir = config.ledger.dir.as_ref().map(PathBuf::from);

        Self {
            users: DashMap::new(),
            config,
            ledger_dir,
            events,
        }
    }

    /// Subscribe to the engine event stream (trades, transitions, snapshots)
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Get a user's instance, creating it lazily on first access.
    ///
    /// A file-backed coordination ledger is opened per user when a ledger
    /// directory is configured; shadow instances in other processes share it.
    pub async fn get_or_create(&self, user_id: &str) -> Result<Arc<UserSlot>> {
        if let Some(slot) = self.users.get(user_id) {
            return Ok(slot.clone());
        }

        let ledger = match &self.ledger_dir {
            Some(dir) => Arc::new(FactLog::open(dir.join(format!("{user_id}.log"))).await?),
            None => Arc::new(FactLog::in_memory()),
        };

        let engine = CycleEngine::new(
            user_id,
            &self.config.strategy,
            ledger,
            self.events.clone(),
        );
        let slot = Arc::new(UserSlot {
            engine: Mutex::new(engine),
        });

        info!(user = user_id, "Strategy instance created");

        // Another task may have won the race; keep whichever landed first
        let slot = self
            .users
            .entry(user_id.to_string())
            .or_insert(slot)
            .value()
            .clone();
        Ok(slot)
    }

    /// Inject or refresh a user's credentials; the gateway handle is rebuilt
    /// and swapped on every call.
    pub async fn set_credentials(&self, user_id: &str, credentials: &Credentials) -> Result<()> {
        let slot = self.get_or_create(user_id).await?;
        let gateway = build_gateway(credentials);
        slot.engine.lock().await.bind_gateway(gateway);
        info!(user = user_id, "Gateway bound");
        Ok(())
    }

    /// Patch one parameter for a user (creating the instance if needed)
    pub async fn patch_parameter(
        &self,
        user_id: &str,
        scope: ParamScope,
        name: &str,
        value: ParamValue,
    ) -> Result<()> {
        let slot = self.get_or_create(user_id).await?;
        let result = slot.engine.lock().await.patch_parameter(scope, name, value);
        result
    }

    /// Explicitly remove a user's instance
    pub fn remove(&self, user_id: &str) -> bool {
        let removed = self.users.remove(user_id).is_some();
        if removed {
            info!(user = user_id, "Strategy instance removed");
        }
        removed
    }

    /// Ids of all live instances
    pub fn list_active(&self) -> Vec<String> {
        self.users.iter().map(|e| e.key().clone()).collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl UserProcessor for StrategyRegistry {
    async fn process_user(&self, user_id: &str, snapshot: &TickSnapshot) -> Result<UserOutcome> {
        let slot = self.get_or_create(user_id).await?;
        let mut engine = slot.engine.lock().await;
        engine.process(snapshot).await
    }
}
