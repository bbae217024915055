//! Experience registry: outcomes of finished runs, kept for later runs to
//! learn from.
//!
//! An experience points at a run's archived simulation data and carries
//! the digests and headline numbers needed to rank strategies without
//! fetching the archive. A run may collect several experiences (one per
//! evaluation, say); they are kept in submission order.
//!
//! Under [`ConsistencyMode::Permissive`] experiences are accepted for any
//! run key. [`ConsistencyMode::Strict`] requires the run to have been
//! initialized; active and completed runs both qualify, since experiences
//! are normally submitted once the run is over.

use chrono::Utc;
use colony_types::{
    CallerId, ContentHash, ExperienceRecord, Notification, NotificationRecord, RunKey, RunStatus, SimulationRun,
};
use tracing::{info, warn};

use crate::LedgerError;
use crate::ledger::{ConsistencyMode, Ledger};
use crate::store::{LedgerStore, Page, PendingNotification};

/// Input of [`Ledger::submit_experience`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experience {
    /// Content identifier of the archived simulation data.
    pub ipfs_cid: String,
    /// Digest of the simulation results.
    pub data_hash: ContentHash,
    /// Performance score (cells killed).
    pub score: u32,
    /// Strategy family.
    pub strategy_type: String,
    /// Model that drove the agents.
    pub model_used: String,
    /// Number of nanobots deployed.
    pub nanobot_count: u32,
    /// Tumor size parameter.
    pub tumor_radius: u32,
    /// Digest of the tumor geometry.
    pub dataset_hash: ContentHash,
}

fn admit(mode: ConsistencyMode, run: &SimulationRun) -> Result<(), LedgerError> {
    match (mode, run.status()) {
        (ConsistencyMode::Strict, RunStatus::Uninitialized) => {
            Err(LedgerError::RunNotInitialized { run_key: run.run_key })
        }
        _ => Ok(()),
    }
}

impl<S: LedgerStore> Ledger<S> {
    /// Register `experience` for `run_key` and emit `ExperienceSubmitted`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::RunNotInitialized`] in strict mode when the run was
    /// never initialized, [`LedgerError::Unavailable`] on storage failure.
    pub async fn submit_experience(
        &self,
        caller: &CallerId,
        run_key: RunKey,
        experience: Experience,
    ) -> Result<NotificationRecord, LedgerError> {
        let recorded_at = Utc::now();
        let Experience {
            ipfs_cid,
            data_hash,
            score,
            strategy_type,
            model_used,
            nanobot_count,
            tumor_radius,
            dataset_hash,
        } = experience;
        let pending = PendingNotification::new(
            Notification::ExperienceSubmitted {
                run_key,
                ipfs_cid: ipfs_cid.clone(),
                score,
                caller: caller.clone(),
            },
            recorded_at,
        );
        let record = ExperienceRecord {
            run_key,
            ipfs_cid,
            data_hash,
            score,
            strategy_type,
            model_used,
            nanobot_count,
            tumor_radius,
            dataset_hash,
            submitter: caller.clone(),
            recorded_at,
        };

        let mode = self.consistency;
        let committed = self
            .store
            .append_experience(record, pending, move |run| admit(mode, run), &self.feed)
            .await
            .inspect_err(|err| warn!(%run_key, %caller, code = err.code(), "Rejected experience"))?;

        info!(%run_key, %caller, score, sequence = committed.sequence, "Experience submitted");
        Ok(committed)
    }

    /// Number of experiences registered for `run_key`.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn experience_count(&self, run_key: RunKey) -> Result<u64, LedgerError> {
        Ok(self.store.experience_count(run_key).await?)
    }

    /// Experiences for `run_key` in submission order.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn experiences(&self, run_key: RunKey, page: Page) -> Result<Vec<ExperienceRecord>, LedgerError> {
        Ok(self.store.experiences(run_key, page).await?)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use colony_types::{NotificationKind, RunSummary};

    use crate::MemoryStore;

    use super::*;

    fn user(name: &str) -> CallerId {
        CallerId::new(name).expect("caller")
    }

    fn experience(score: u32) -> Experience {
        Experience {
            ipfs_cid: "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi".to_owned(),
            data_hash: ContentHash::digest(b"results"),
            score,
            strategy_type: "pheromone-guided".to_owned(),
            model_used: "local-planner".to_owned(),
            nanobot_count: 10,
            tumor_radius: 200,
            dataset_hash: ContentHash::digest(b"geometry"),
        }
    }

    #[tokio::test]
    async fn experiences_are_listed_in_submission_order() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("run-A");
        let mut sub = ledger.subscribe_kinds([NotificationKind::ExperienceSubmitted]);

        ledger.submit_experience(&user("U1"), key, experience(12)).await.expect("first");
        ledger.submit_experience(&user("U2"), key, experience(30)).await.expect("second");

        let stored = ledger.experiences(key, Page::default()).await.expect("list");
        let scores: Vec<u32> = stored.iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![12, 30]);
        assert_eq!(stored.first().map(|e| e.submitter.as_str()), Some("U1"));
        assert_eq!(stored.first().map(|e| e.tumor_radius), Some(200));
        assert_eq!(ledger.experience_count(key).await.expect("count"), 2);
        assert_eq!(ledger.experience_count(RunKey::from_label("other")).await.expect("count"), 0);

        let published = sub.recv().await.expect("notification");
        assert_eq!(
            published.notification,
            Notification::ExperienceSubmitted {
                run_key: key,
                ipfs_cid: experience(12).ipfs_cid,
                score: 12,
                caller: user("U1"),
            }
        );
    }

    #[tokio::test]
    async fn strict_mode_requires_an_initialized_run() {
        let ledger = Ledger::new(MemoryStore::new()).with_consistency(ConsistencyMode::Strict);
        let key = RunKey::from_label("strict");

        let early = ledger.submit_experience(&user("U1"), key, experience(1)).await;
        assert!(matches!(early, Err(LedgerError::RunNotInitialized { .. })));
        assert_eq!(ledger.latest_sequence().await.expect("seq"), 0);

        ledger.initialize_simulation(&user("U1"), key).await.expect("init");
        ledger.complete_simulation(&user("U1"), key, RunSummary::default()).await.expect("complete");
        ledger.submit_experience(&user("U1"), key, experience(5)).await.expect("after completion");
        assert_eq!(ledger.experience_count(key).await.expect("count"), 1);
    }
}
