//! Core ledger records: runs and the domain events recorded against them.
//!
//! Run-scoped records ([`SimulationRun`], [`DrugDeliveryEvent`],
//! [`TumorKillEvent`], [`ExperienceRecord`]) belong to the tumor-treatment
//! simulation. Grid records
//! ([`GridCell`], [`FoodCollectionEvent`]) belong to the foraging simulation
//! and are not scoped to any run.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{CallerId, CellId, CellKey, CollectibleId, ContentHash, RunKey};

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A cell on the two-dimensional foraging grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GridCell {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl GridCell {
    /// Create a grid cell.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// The dedup key used by the visitation index.
    pub fn key(self) -> CellKey {
        CellKey::for_coordinates(self.x, self.y)
    }
}

/// A point in the three-dimensional tumor microenvironment (micrometres).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Position3 {
    /// X coordinate.
    pub x: u32,
    /// Y coordinate.
    pub y: u32,
    /// Z coordinate.
    pub z: u32,
}

impl Position3 {
    /// Create a position.
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

// ---------------------------------------------------------------------------
// Fixed-point payload
// ---------------------------------------------------------------------------

/// Drug payload amount with two implied decimal places.
///
/// The raw value `150` means `1.50` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(transparent)]
pub struct PayloadAmount(u16);

impl PayloadAmount {
    /// Number of implied decimal places.
    pub const SCALE: u32 = 2;

    /// Wrap a raw fixed-point value.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Return the raw fixed-point value.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Convert a decimal quantity, scaling by 100 and saturating at the
    /// field width. Negative quantities clamp to zero.
    pub fn from_decimal_saturating(amount: Decimal) -> Self {
        Self(crate::scaling::centi_u16(amount))
    }

    /// The exact decimal value.
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(i64::from(self.0), Self::SCALE)
    }
}

// ---------------------------------------------------------------------------
// Simulation runs
// ---------------------------------------------------------------------------

/// Lifecycle position of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No record exists for the run key.
    Uninitialized,
    /// Initialized and accepting a completion summary.
    Active,
    /// Terminal: the summary has been recorded.
    Completed,
}

impl RunStatus {
    /// Lowercase name, as used in logs and error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl core::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary counters asserted by the submitter when a run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunSummary {
    /// Total simulation steps executed.
    pub total_steps: u32,
    /// Tumor cells killed.
    pub cells_killed: u16,
    /// Drug deliveries performed.
    pub drug_deliveries: u16,
}

/// The ledger's record of one simulation run.
///
/// A run key that was never initialized reads back as the zero-valued
/// sentinel from [`SimulationRun::uninitialized`]: no start time, no
/// submitter, zeroed counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SimulationRun {
    /// The run this record describes.
    pub run_key: RunKey,
    /// When the run was initialized. `None` means uninitialized.
    pub start_time: Option<DateTime<Utc>>,
    /// Total steps, written at completion.
    pub total_steps: u32,
    /// Cells killed, written at completion.
    pub cells_killed: u16,
    /// Drug deliveries, written at completion.
    pub drug_deliveries: u16,
    /// Identity that initialized the run.
    pub submitter: Option<CallerId>,
    /// Whether the run has been completed.
    pub completed: bool,
}

impl SimulationRun {
    /// The zero-valued record returned for unknown run keys.
    pub const fn uninitialized(run_key: RunKey) -> Self {
        Self {
            run_key,
            start_time: None,
            total_steps: 0,
            cells_killed: 0,
            drug_deliveries: 0,
            submitter: None,
            completed: false,
        }
    }

    /// A freshly initialized, active record.
    pub const fn started(run_key: RunKey, submitter: CallerId, start_time: DateTime<Utc>) -> Self {
        Self {
            run_key,
            start_time: Some(start_time),
            total_steps: 0,
            cells_killed: 0,
            drug_deliveries: 0,
            submitter: Some(submitter),
            completed: false,
        }
    }

    /// Derive the lifecycle position. A set start time is the presence
    /// sentinel.
    pub const fn status(&self) -> RunStatus {
        if self.start_time.is_none() {
            RunStatus::Uninitialized
        } else if self.completed {
            RunStatus::Completed
        } else {
            RunStatus::Active
        }
    }

    /// The completion summary currently on record.
    pub const fn summary(&self) -> RunSummary {
        RunSummary {
            total_steps: self.total_steps,
            cells_killed: self.cells_killed,
            drug_deliveries: self.drug_deliveries,
        }
    }
}

// ---------------------------------------------------------------------------
// Domain events
// ---------------------------------------------------------------------------

/// One drug delivery performed by a nanobot during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DrugDeliveryEvent {
    /// Owning run.
    pub run_key: RunKey,
    /// Where the payload was released.
    pub position: Position3,
    /// Simulation time, in hundredths of a minute.
    pub timestamp: u32,
    /// Delivering agent.
    pub agent: CallerId,
    /// Amount released.
    pub payload: PayloadAmount,
    /// Wall-clock time the ledger accepted the event.
    pub recorded_at: DateTime<Utc>,
}

/// One tumor cell kill attributed to an agent during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TumorKillEvent {
    /// Owning run.
    pub run_key: RunKey,
    /// The killed cell, unique within the run.
    pub cell_id: CellId,
    /// Where the cell was.
    pub position: Position3,
    /// Simulation time, in hundredths of a minute.
    pub timestamp: u32,
    /// Responsible agent.
    pub agent: CallerId,
    /// Wall-clock time the ledger accepted the event.
    pub recorded_at: DateTime<Utc>,
}

/// A finished run's outcome, registered so later runs can learn from it.
///
/// The full simulation data lives in content-addressed storage under
/// `ipfs_cid`; the ledger keeps the pointer, the digests that pin it and
/// the headline numbers used to rank strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ExperienceRecord {
    /// The run the experience describes.
    pub run_key: RunKey,
    /// Content identifier of the archived simulation data.
    pub ipfs_cid: String,
    /// Digest of the simulation results.
    pub data_hash: ContentHash,
    /// Performance score (cells killed).
    pub score: u32,
    /// Strategy family, e.g. `pheromone-guided`.
    pub strategy_type: String,
    /// Model that drove the agents.
    pub model_used: String,
    /// Number of nanobots deployed.
    pub nanobot_count: u32,
    /// Tumor size parameter.
    pub tumor_radius: u32,
    /// Digest of the tumor geometry.
    pub dataset_hash: ContentHash,
    /// Identity that submitted the experience.
    pub submitter: CallerId,
    /// Wall-clock time the ledger accepted the submission.
    pub recorded_at: DateTime<Utc>,
}

/// A food item picked up on the foraging grid.
///
/// Not deduplicated: the same collectible may be recorded more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct FoodCollectionEvent {
    /// The collectible picked up.
    pub collectible_id: CollectibleId,
    /// Where it was picked up.
    pub cell: GridCell,
    /// Collecting agent.
    pub agent: CallerId,
    /// Wall-clock time the ledger accepted the event.
    pub recorded_at: DateTime<Utc>,
}
