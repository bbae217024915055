//! Notifications published after every successful ledger mutation.
//!
//! Notifications are "something changed" records for downstream observers
//! (dashboards, relays). They are distinct from the domain events they
//! describe: a [`Notification::DrugDelivered`] announces that a
//! [`DrugDeliveryEvent`](crate::DrugDeliveryEvent) was appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{CallerId, CellId, CollectibleId, RunKey};
use crate::structs::PayloadAmount;

/// Discriminant of a [`Notification`], used for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A grid cell was visited for the first time.
    CellVisited,
    /// A food item was collected.
    FoodCollected,
    /// A simulation run was initialized.
    SimulationInitialized,
    /// A drug delivery was recorded.
    DrugDelivered,
    /// A tumor cell kill was recorded.
    TumorCellKilled,
    /// A simulation run was completed.
    SimulationCompleted,
    /// A run's experience was registered.
    ExperienceSubmitted,
}

impl NotificationKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::CellVisited,
        Self::FoodCollected,
        Self::SimulationInitialized,
        Self::DrugDelivered,
        Self::TumorCellKilled,
        Self::SimulationCompleted,
        Self::ExperienceSubmitted,
    ];

    /// `snake_case` name, also used as a topic suffix.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CellVisited => "cell_visited",
            Self::FoodCollected => "food_collected",
            Self::SimulationInitialized => "simulation_initialized",
            Self::DrugDelivered => "drug_delivered",
            Self::TumorCellKilled => "tumor_cell_killed",
            Self::SimulationCompleted => "simulation_completed",
            Self::ExperienceSubmitted => "experience_submitted",
        }
    }
}

impl core::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown notification kind: {s}"))
    }
}

/// Payload of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// First visit to grid cell `(x, y)`.
    CellVisited {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Visiting agent.
        caller: CallerId,
    },
    /// Collectible `id` picked up at `(x, y)`.
    FoodCollected {
        /// Collectible picked up.
        id: CollectibleId,
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Collecting agent.
        caller: CallerId,
    },
    /// Run initialized by `caller`.
    SimulationInitialized {
        /// The new run.
        run_key: RunKey,
        /// Submitter of the run.
        caller: CallerId,
    },
    /// Drug payload released inside a run.
    DrugDelivered {
        /// Owning run.
        run_key: RunKey,
        /// X coordinate.
        x: u32,
        /// Y coordinate.
        y: u32,
        /// Z coordinate.
        z: u32,
        /// Simulation time, in hundredths of a minute.
        timestamp: u32,
        /// Delivering agent.
        caller: CallerId,
        /// Amount released.
        payload_amount: PayloadAmount,
    },
    /// Tumor cell killed inside a run.
    TumorCellKilled {
        /// Owning run.
        run_key: RunKey,
        /// The killed cell.
        cell_id: CellId,
        /// X coordinate.
        x: u32,
        /// Y coordinate.
        y: u32,
        /// Z coordinate.
        z: u32,
        /// Simulation time, in hundredths of a minute.
        timestamp: u32,
        /// Responsible agent.
        caller: CallerId,
    },
    /// Run completed with its summary counters.
    SimulationCompleted {
        /// The completed run.
        run_key: RunKey,
        /// Total steps executed.
        total_steps: u32,
        /// Cells killed.
        cells_killed: u16,
        /// Drug deliveries performed.
        drug_deliveries: u16,
        /// Submitter that completed the run.
        caller: CallerId,
    },
    /// Experience registered for a run.
    ExperienceSubmitted {
        /// The run described.
        run_key: RunKey,
        /// Where the simulation data is archived.
        ipfs_cid: String,
        /// Performance score.
        score: u32,
        /// Submitting identity.
        caller: CallerId,
    },
}

impl Notification {
    /// The discriminant of this notification.
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::CellVisited { .. } => NotificationKind::CellVisited,
            Self::FoodCollected { .. } => NotificationKind::FoodCollected,
            Self::SimulationInitialized { .. } => NotificationKind::SimulationInitialized,
            Self::DrugDelivered { .. } => NotificationKind::DrugDelivered,
            Self::TumorCellKilled { .. } => NotificationKind::TumorCellKilled,
            Self::SimulationCompleted { .. } => NotificationKind::SimulationCompleted,
            Self::ExperienceSubmitted { .. } => NotificationKind::ExperienceSubmitted,
        }
    }

    /// The run this notification belongs to, if it is run-scoped.
    pub const fn run_key(&self) -> Option<RunKey> {
        match self {
            Self::SimulationInitialized { run_key, .. }
            | Self::DrugDelivered { run_key, .. }
            | Self::TumorCellKilled { run_key, .. }
            | Self::SimulationCompleted { run_key, .. }
            | Self::ExperienceSubmitted { run_key, .. } => Some(*run_key),
            Self::CellVisited { .. } | Self::FoodCollected { .. } => None,
        }
    }
}

/// A notification as stored in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NotificationRecord {
    /// Position in the feed. Strictly increasing, starting at 1.
    pub sequence: u64,
    /// Wall-clock time the mutation committed.
    pub recorded_at: DateTime<Utc>,
    /// What changed.
    pub notification: Notification,
}
