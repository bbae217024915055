//! Per-run, per-kind append-only event sequences.
//!
//! Drug deliveries and tumor kills are appended to their run's sequence in
//! acceptance order. Under [`ConsistencyMode::Permissive`] any caller may
//! append to any run key, including keys that were never initialized or
//! are already completed. [`ConsistencyMode::Strict`] only accepts events
//! for active runs.

use chrono::Utc;
use colony_types::{
    CallerId, CellId, DrugDeliveryEvent, Notification, NotificationRecord, PayloadAmount, Position3, RunKey,
    RunStatus, SimulationRun, TumorKillEvent,
};
use tracing::{debug, warn};

use crate::LedgerError;
use crate::ledger::{ConsistencyMode, Ledger};
use crate::store::{LedgerStore, PendingNotification};

/// Input of [`Ledger::record_drug_delivery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrugDelivery {
    /// Where the payload was released.
    pub position: Position3,
    /// Simulation time, in hundredths of a minute.
    pub timestamp: u32,
    /// Amount released.
    pub payload: PayloadAmount,
}

/// Input of [`Ledger::record_tumor_kill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumorKill {
    /// The killed cell.
    pub cell_id: CellId,
    /// Where the cell was.
    pub position: Position3,
    /// Simulation time, in hundredths of a minute.
    pub timestamp: u32,
}

/// Admission check evaluated against the run's record under its key.
fn admit(mode: ConsistencyMode, run: &SimulationRun) -> Result<(), LedgerError> {
    match (mode, run.status()) {
        (ConsistencyMode::Permissive, _) | (ConsistencyMode::Strict, RunStatus::Active) => Ok(()),
        (ConsistencyMode::Strict, status) => Err(LedgerError::RunNotActive {
            run_key: run.run_key,
            status,
        }),
    }
}

impl<S: LedgerStore> Ledger<S> {
    /// Append a drug delivery to `run_key` and emit `DrugDelivered`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::RunNotActive`] in strict mode when the run is not
    /// active, [`LedgerError::Unavailable`] on storage failure.
    pub async fn record_drug_delivery(
        &self,
        caller: &CallerId,
        run_key: RunKey,
        delivery: DrugDelivery,
    ) -> Result<NotificationRecord, LedgerError> {
        let recorded_at = Utc::now();
        let DrugDelivery {
            position,
            timestamp,
            payload,
        } = delivery;
        let event = DrugDeliveryEvent {
            run_key,
            position,
            timestamp,
            agent: caller.clone(),
            payload,
            recorded_at,
        };
        let pending = PendingNotification::new(
            Notification::DrugDelivered {
                run_key,
                x: position.x,
                y: position.y,
                z: position.z,
                timestamp,
                caller: caller.clone(),
                payload_amount: payload,
            },
            recorded_at,
        );

        let mode = self.consistency;
        let record = self
            .store
            .append_delivery(event, pending, move |run| admit(mode, run), &self.feed)
            .await
            .inspect_err(|err| warn!(%run_key, %caller, code = err.code(), "Rejected drug delivery"))?;

        debug!(%run_key, %caller, timestamp, payload = payload.raw(), sequence = record.sequence, "Drug delivered");
        Ok(record)
    }

    /// Append a tumor kill to `run_key` and emit `TumorCellKilled`.
    ///
    /// The same cell id may be recorded more than once; uniqueness is the
    /// simulation's concern.
    ///
    /// # Errors
    ///
    /// [`LedgerError::RunNotActive`] in strict mode when the run is not
    /// active, [`LedgerError::Unavailable`] on storage failure.
    pub async fn record_tumor_kill(
        &self,
        caller: &CallerId,
        run_key: RunKey,
        kill: TumorKill,
    ) -> Result<NotificationRecord, LedgerError> {
        let recorded_at = Utc::now();
        let TumorKill {
            cell_id,
            position,
            timestamp,
        } = kill;
        let event = TumorKillEvent {
            run_key,
            cell_id,
            position,
            timestamp,
            agent: caller.clone(),
            recorded_at,
        };
        let pending = PendingNotification::new(
            Notification::TumorCellKilled {
                run_key,
                cell_id,
                x: position.x,
                y: position.y,
                z: position.z,
                timestamp,
                caller: caller.clone(),
            },
            recorded_at,
        );

        let mode = self.consistency;
        let record = self
            .store
            .append_kill(event, pending, move |run| admit(mode, run), &self.feed)
            .await
            .inspect_err(|err| warn!(%run_key, %caller, code = err.code(), "Rejected tumor kill"))?;

        debug!(%run_key, %caller, %cell_id, timestamp, sequence = record.sequence, "Tumor cell killed");
        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use colony_types::RunSummary;

    use crate::{MemoryStore, Page};

    use super::*;

    fn agent(name: &str) -> CallerId {
        CallerId::new(name).expect("caller")
    }

    fn delivery(timestamp: u32) -> DrugDelivery {
        DrugDelivery {
            position: Position3::new(10, 20, 30),
            timestamp,
            payload: PayloadAmount::from_raw(150),
        }
    }

    #[tokio::test]
    async fn permissive_mode_accepts_uninitialized_runs() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("never-initialized");

        ledger.record_drug_delivery(&agent("nanobot-1"), key, delivery(100)).await.expect("delivery");

        assert_eq!(ledger.delivery_count(key).await.expect("count"), 1);
        let stored = ledger.deliveries(key, Page::default()).await.expect("list");
        let first = stored.first().expect("one delivery");
        assert_eq!(first.position, Position3::new(10, 20, 30));
        assert_eq!(first.timestamp, 100);
        assert_eq!(first.payload.raw(), 150);
        assert_eq!(first.agent, agent("nanobot-1"));
    }

    #[tokio::test]
    async fn permissive_mode_accepts_completed_runs() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("finished");
        let owner = agent("U1");
        ledger.initialize_simulation(&owner, key).await.expect("init");
        ledger.complete_simulation(&owner, key, RunSummary::default()).await.expect("complete");

        let kill = TumorKill {
            cell_id: CellId::from_u128(7),
            position: Position3::new(1, 2, 3),
            timestamp: 5,
        };
        ledger.record_tumor_kill(&agent("nanobot-9"), key, kill).await.expect("kill");
        assert_eq!(ledger.kill_count(key).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn strict_mode_rejects_inactive_runs() {
        let ledger = Ledger::new(MemoryStore::new()).with_consistency(ConsistencyMode::Strict);
        let key = RunKey::from_label("strict");

        let err = ledger.record_drug_delivery(&agent("nanobot-1"), key, delivery(1)).await;
        assert!(matches!(
            err,
            Err(LedgerError::RunNotActive { status: RunStatus::Uninitialized, .. })
        ));
        assert_eq!(ledger.delivery_count(key).await.expect("count"), 0);
        assert_eq!(ledger.latest_sequence().await.expect("seq"), 0);

        ledger.initialize_simulation(&agent("U1"), key).await.expect("init");
        ledger.record_drug_delivery(&agent("nanobot-1"), key, delivery(2)).await.expect("active run");

        ledger.complete_simulation(&agent("U1"), key, RunSummary::default()).await.expect("complete");
        let late = ledger.record_drug_delivery(&agent("nanobot-1"), key, delivery(3)).await;
        assert!(matches!(
            late,
            Err(LedgerError::RunNotActive { status: RunStatus::Completed, .. })
        ));
        assert_eq!(ledger.delivery_count(key).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn sequences_are_independent_per_run() {
        let ledger = Ledger::new(MemoryStore::new());
        let a = RunKey::from_label("a");
        let b = RunKey::from_label("b");
        let bot = agent("nanobot");

        ledger.record_drug_delivery(&bot, a, delivery(1)).await.expect("a1");
        ledger.record_drug_delivery(&bot, b, delivery(2)).await.expect("b1");
        ledger.record_drug_delivery(&bot, a, delivery(3)).await.expect("a2");

        let in_a: Vec<u32> = ledger
            .deliveries(a, Page::default())
            .await
            .expect("list")
            .iter()
            .map(|d| d.timestamp)
            .collect();
        assert_eq!(in_a, vec![1, 3]);
        assert_eq!(ledger.delivery_count(b).await.expect("count"), 1);
        assert_eq!(ledger.kill_count(a).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn duplicate_kills_are_both_recorded() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("dupes");
        let kill = TumorKill {
            cell_id: CellId::from_u128(42),
            position: Position3::default(),
            timestamp: 9,
        };
        ledger.record_tumor_kill(&agent("n1"), key, kill).await.expect("kill");
        ledger.record_tumor_kill(&agent("n2"), key, kill).await.expect("kill");
        assert_eq!(ledger.kill_count(key).await.expect("count"), 2);
    }
}
