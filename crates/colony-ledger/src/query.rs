//! Read-only façade over the ledger.
//!
//! Reads never mutate state and never emit notifications. Unknown run keys
//! read as zero counts, empty sequences, and the zero-valued run sentinel.

use colony_types::{DrugDeliveryEvent, NotificationRecord, RunKey, SimulationRun, TumorKillEvent};

use crate::LedgerError;
use crate::ledger::Ledger;
use crate::store::{LedgerStore, MAX_PAGE_SIZE, Page};

impl<S: LedgerStore> Ledger<S> {
    /// Number of drug deliveries recorded for `run_key`.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn delivery_count(&self, run_key: RunKey) -> Result<u64, LedgerError> {
        Ok(self.store.delivery_count(run_key).await?)
    }

    /// Number of tumor kills recorded for `run_key`.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn kill_count(&self, run_key: RunKey) -> Result<u64, LedgerError> {
        Ok(self.store.kill_count(run_key).await?)
    }

    /// The record for `run_key`, or the zero-valued sentinel when the key
    /// was never initialized.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn simulation_run(&self, run_key: RunKey) -> Result<SimulationRun, LedgerError> {
        Ok(self
            .store
            .get_run(run_key)
            .await?
            .unwrap_or_else(|| SimulationRun::uninitialized(run_key)))
    }

    /// Drug deliveries for `run_key` in acceptance order.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn deliveries(&self, run_key: RunKey, page: Page) -> Result<Vec<DrugDeliveryEvent>, LedgerError> {
        Ok(self.store.deliveries(run_key, page).await?)
    }

    /// Tumor kills for `run_key` in acceptance order.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn kills(&self, run_key: RunKey, page: Page) -> Result<Vec<TumorKillEvent>, LedgerError> {
        Ok(self.store.kills(run_key, page).await?)
    }

    /// Committed notifications after `cursor`, oldest first.
    ///
    /// `limit` is clamped to [`MAX_PAGE_SIZE`]. Pass the last sequence
    /// number seen to resume a feed after a lag or reconnect.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn notifications_since(&self, cursor: u64, limit: u32) -> Result<Vec<NotificationRecord>, LedgerError> {
        Ok(self.store.notifications_since(cursor, limit.min(MAX_PAGE_SIZE)).await?)
    }

    /// Sequence number of the newest committed notification (0 when none).
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn latest_sequence(&self) -> Result<u64, LedgerError> {
        Ok(self.store.latest_sequence().await?)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use colony_types::{CallerId, CellId, PayloadAmount, Position3, RunStatus};

    use crate::{DrugDelivery, MemoryStore, TumorKill};

    use super::*;

    #[tokio::test]
    async fn unknown_run_reads_as_sentinel() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("nobody");

        let run = ledger.simulation_run(key).await.expect("read");
        assert_eq!(run, SimulationRun::uninitialized(key));
        assert_eq!(run.status(), RunStatus::Uninitialized);
        assert_eq!(ledger.delivery_count(key).await.expect("count"), 0);
        assert!(ledger.kills(key, Page::default()).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn reads_do_not_emit_notifications() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("quiet");
        ledger.simulation_run(key).await.expect("read");
        ledger.delivery_count(key).await.expect("read");
        ledger.kill_count(key).await.expect("read");
        assert_eq!(ledger.latest_sequence().await.expect("seq"), 0);
    }

    #[tokio::test]
    async fn count_matches_listing_and_paging_walks_in_order() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("paged");
        let bot = CallerId::new("nanobot").expect("caller");
        for timestamp in 0..5_u32 {
            let kill = TumorKill {
                cell_id: CellId::from_u128(u128::from(timestamp)),
                position: Position3::default(),
                timestamp,
            };
            ledger.record_tumor_kill(&bot, key, kill).await.expect("kill");
        }

        let all = ledger.kills(key, Page::default()).await.expect("list");
        assert_eq!(u64::try_from(all.len()).ok(), Some(ledger.kill_count(key).await.expect("count")));

        let middle: Vec<u32> = ledger
            .kills(key, Page::new(1, 3))
            .await
            .expect("list")
            .iter()
            .map(|k| k.timestamp)
            .collect();
        assert_eq!(middle, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn notification_cursor_resumes_after_last_seen() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("cursor");
        let bot = CallerId::new("nanobot").expect("caller");
        let delivery = DrugDelivery {
            position: Position3::new(1, 1, 1),
            timestamp: 0,
            payload: PayloadAmount::from_raw(1),
        };
        for _ in 0..4 {
            ledger.record_drug_delivery(&bot, key, delivery).await.expect("delivery");
        }

        let tail = ledger.notifications_since(2, 10).await.expect("feed");
        let sequences: Vec<u64> = tail.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
        assert_eq!(ledger.latest_sequence().await.expect("seq"), 4);
        assert!(ledger.notifications_since(4, 10).await.expect("feed").is_empty());
    }
}
