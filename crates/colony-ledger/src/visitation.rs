//! Visitation dedup index and food collection log.
//!
//! Both belong to the foraging simulation and are not scoped to any run.
//! The dedup index is write-once set membership keyed by a hash of the
//! grid coordinates. Food collections are a plain append-only log with no
//! dedup: recording the same collectible twice yields two records.

use chrono::Utc;
use colony_types::{CallerId, CollectibleId, FoodCollectionEvent, GridCell, Notification, NotificationRecord};
use tracing::debug;

use crate::LedgerError;
use crate::ledger::Ledger;
use crate::store::{LedgerStore, Page, PendingNotification};

impl<S: LedgerStore> Ledger<S> {
    /// Mark grid cell `(x, y)` as visited.
    ///
    /// The first call for a cell inserts it and emits `CellVisited`; later
    /// calls change nothing and emit nothing. Returns the committed
    /// notification on first visit, `None` otherwise.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn mark_visited(
        &self,
        caller: &CallerId,
        x: u32,
        y: u32,
    ) -> Result<Option<NotificationRecord>, LedgerError> {
        let cell = GridCell::new(x, y);
        let pending = PendingNotification::new(
            Notification::CellVisited {
                x,
                y,
                caller: caller.clone(),
            },
            Utc::now(),
        );

        let record = self.store.insert_visited(cell, pending, &self.feed).await?;
        match &record {
            Some(record) => debug!(x, y, %caller, sequence = record.sequence, "Cell visited"),
            None => debug!(x, y, %caller, "Cell already visited"),
        }
        Ok(record)
    }

    /// Whether grid cell `(x, y)` has ever been visited.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn has_visited(&self, x: u32, y: u32) -> Result<bool, LedgerError> {
        Ok(self.store.is_visited(GridCell::new(x, y)).await?)
    }

    /// Record that `caller` collected food item `id` at `(x, y)`.
    ///
    /// Always appends and always emits `FoodCollected`.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn record_food(
        &self,
        caller: &CallerId,
        id: CollectibleId,
        x: u32,
        y: u32,
    ) -> Result<NotificationRecord, LedgerError> {
        let recorded_at = Utc::now();
        let event = FoodCollectionEvent {
            collectible_id: id,
            cell: GridCell::new(x, y),
            agent: caller.clone(),
            recorded_at,
        };
        let pending = PendingNotification::new(
            Notification::FoodCollected {
                id,
                x,
                y,
                caller: caller.clone(),
            },
            recorded_at,
        );

        let record = self.store.append_food(event, pending, &self.feed).await?;
        debug!(%id, x, y, %caller, sequence = record.sequence, "Food collected");
        Ok(record)
    }

    /// Food collections in insertion order.
    ///
    /// # Errors
    ///
    /// Only [`LedgerError::Unavailable`].
    pub async fn food_collections(&self, page: Page) -> Result<Vec<FoodCollectionEvent>, LedgerError> {
        Ok(self.store.food_collections(page).await?)
    }
}
