//! Coordination ledger: a shared, append-only, cycle-indexed fact log.
//!
//! Parallel shadow runs of the same logical cycle never talk to each other
//! directly; they converge by appending facts here and re-reading them. The
//! in-memory index gives cycle-scoped lookup without a linear re-scan; an
//! optional newline-delimited backing file makes facts durable across
//! restarts and visible to instances in other processes.
//!
//! Entries are never rewritten or deleted. The quorum rule relies on counts
//! being monotonic.

mod fact;

pub use fact::{
    CompletionMethod, CycleFact, PayloadKind, PrebuyLeg, PrebuyPair, PreviousOutcome, RebuyNote,
    COMPLETION_QUORUM,
};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;

struct LogInner {
    facts: Vec<CycleFact>,
    by_cycle: HashMap<u64, Vec<usize>>,
    file: Option<File>,
}

impl LogInner {
    fn index(&mut self, fact: CycleFact) {
        let idx = self.facts.len();
        self.by_cycle.entry(fact.cycle()).or_default().push(idx);
        self.facts.push(fact);
    }
}

/// Append-only fact log shared by every instance working one logical cycle
pub struct FactLog {
    inner: RwLock<LogInner>,
    path: Option<PathBuf>,
}

impl FactLog {
    /// Memory-only log (tests, dry runs)
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(LogInner {
                facts: Vec::new(),
                by_cycle: HashMap::new(),
                file: None,
            }),
            path: None,
        }
    }

    /// Open (or create) a file-backed log, replaying existing lines.
    /// Malformed lines are skipped with a warning, never fatal.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut inner = LogInner {
            facts: Vec::new(),
            by_cycle: HashMap::new(),
            file: None,
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(existing) => {
                let mut skipped = 0usize;
                for line in existing.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match CycleFact::decode(line) {
                        Some(fact) => inner.index(fact),
                        None => {
                            skipped += 1;
                            warn!("Skipping malformed ledger line: {line}");
                        }
                    }
                }
                debug!(
                    "Replayed ledger {}: {} facts, {} malformed lines skipped",
                    path.display(),
                    inner.facts.len(),
                    skipped
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        inner.file = Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?,
        );

        Ok(Self {
            inner: RwLock::new(inner),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one fact: indexed and, if file-backed, written as one line.
    /// The write lock makes the append atomic with respect to readers.
    pub async fn append(&self, fact: CycleFact) -> Result<()> {
        let mut inner = self.inner.write().await;

        if let Some(file) = inner.file.as_mut() {
            let mut line = fact.encode();
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }

        debug!("Ledger append: {}", fact.encode());
        inner.index(fact);
        Ok(())
    }

    /// All facts tagged with the given cycle number, in append order
    pub async fn scan(&self, cycle: u64) -> Vec<CycleFact> {
        let inner = self.inner.read().await;
        inner
            .by_cycle
            .get(&cycle)
            .map(|idxs| idxs.iter().map(|&i| inner.facts[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Distinct instance ids that logged the given method for a cycle
    pub async fn completion_instances(
        &self,
        cycle: u64,
        method: CompletionMethod,
    ) -> HashSet<String> {
        let inner = self.inner.read().await;
        let mut instances = HashSet::new();

        if let Some(idxs) = inner.by_cycle.get(&cycle) {
            for &i in idxs {
                if let CycleFact::Completion {
                    instance,
                    method: m,
                    ..
                } = &inner.facts[i]
                {
                    if *m == method {
                        instances.insert(instance.clone());
                    }
                }
            }
        }

        instances
    }

    /// Count of distinct instances that logged COMPLETE for a cycle
    pub async fn completion_count(&self, cycle: u64) -> usize {
        self.completion_instances(cycle, CompletionMethod::Complete)
            .await
            .len()
    }

    /// Whether the completion quorum is met for a cycle
    pub async fn cycle_complete(&self, cycle: u64) -> bool {
        self.completion_count(cycle).await >= COMPLETION_QUORUM
    }

    /// First JSON payload of the given kind for a cycle, if any
    pub async fn find_payload(&self, cycle: u64, kind: PayloadKind) -> Option<serde_json::Value> {
        let inner = self.inner.read().await;

        inner.by_cycle.get(&cycle).and_then(|idxs| {
            idxs.iter().find_map(|&i| match &inner.facts[i] {
                CycleFact::Payload {
                    kind: k, payload, ..
                } if *k == kind => Some(payload.clone()),
                _ => None,
            })
        })
    }

    /// Whether any instance other than `own` announced the given method
    pub async fn peer_announced(
        &self,
        cycle: u64,
        method: CompletionMethod,
        own: &str,
    ) -> bool {
        self.completion_instances(cycle, method)
            .await
            .iter()
            .any(|i| i != own)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.facts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.facts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_quorum_counts_distinct_instances() {
        let log = FactLog::in_memory();

        log.append(CycleFact::Completion {
            cycle: 1,
            instance: "a".into(),
            method: CompletionMethod::Complete,
        })
        .await
        .unwrap();

        // Same instance announcing twice does not reach quorum
        log.append(CycleFact::Completion {
            cycle: 1,
            instance: "a".into(),
            method: CompletionMethod::Complete,
        })
        .await
        .unwrap();

        assert_eq!(log.completion_count(1).await, 1);
        assert!(!log.cycle_complete(1).await);

        log.append(CycleFact::Completion {
            cycle: 1,
            instance: "b".into(),
            method: CompletionMethod::Complete,
        })
        .await
        .unwrap();

        assert!(log.cycle_complete(1).await);
    }

    #[tokio::test]
    async fn test_stale_cycles_ignored() {
        let log = FactLog::in_memory();

        log.append(CycleFact::Completion {
            cycle: 1,
            instance: "a".into(),
            method: CompletionMethod::Complete,
        })
        .await
        .unwrap();
        log.append(CycleFact::Completion {
            cycle: 1,
            instance: "b".into(),
            method: CompletionMethod::Complete,
        })
        .await
        .unwrap();

        assert!(log.cycle_complete(1).await);
        assert!(!log.cycle_complete(2).await);
        assert!(log.scan(2).await.is_empty());
    }

    #[tokio::test]
    async fn test_payload_scan_idempotent() {
        let log = FactLog::in_memory();
        let payload = json!({"main": "X22500CE", "opposite": "X22500PE"});

        log.append(CycleFact::Payload {
            cycle: 4,
            kind: PayloadKind::PrebuyInstruments,
            payload: payload.clone(),
        })
        .await
        .unwrap();

        // Repeated scans return the same payload
        for _ in 0..3 {
            assert_eq!(
                log.find_payload(4, PayloadKind::PrebuyInstruments).await,
                Some(payload.clone())
            );
        }
        assert_eq!(
            log.find_payload(4, PayloadKind::RebuyData).await,
            None
        );
    }

    #[tokio::test]
    async fn test_peer_announced_excludes_self() {
        let log = FactLog::in_memory();

        log.append(CycleFact::Completion {
            cycle: 2,
            instance: "me".into(),
            method: CompletionMethod::TargetHit,
        })
        .await
        .unwrap();

        assert!(!log.peer_announced(2, CompletionMethod::TargetHit, "me").await);
        assert!(log.peer_announced(2, CompletionMethod::TargetHit, "other").await);
    }

    #[tokio::test]
    async fn test_file_backed_replay_skips_malformed() {
        let dir = std::env::temp_dir().join(format!("straddle-ledger-{}", uuid::Uuid::new_v4()));
        let path = dir.join("alice.log");

        {
            let log = FactLog::open(&path).await.unwrap();
            log.append(CycleFact::Completion {
                cycle: 1,
                instance: "a".into(),
                method: CompletionMethod::Complete,
            })
            .await
            .unwrap();
        }

        // Corrupt the file with a junk line between valid appends
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            writeln!(f, "garbage line").unwrap();
            writeln!(f, "1:b:COMPLETE").unwrap();
        }

        let reopened = FactLog::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        assert!(reopened.cycle_complete(1).await);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
