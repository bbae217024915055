//! Shared type definitions for the Colony simulation event ledger.
//!
//! This crate is the single source of truth for the records the ledger
//! stores and the notifications it publishes. Types flow downstream to
//! `TypeScript` via `ts-rs` for dashboard consumers.
//!
//! # Modules
//!
//! - [`ids`] -- 256-bit identifier newtypes and caller identity
//! - [`canonical`] -- Sorted-key JSON text used to derive run keys
//! - [`structs`] -- Runs, coordinates, fixed-point payloads and domain events
//! - [`notification`] -- Notification payloads and feed records
//! - [`scaling`] -- Saturating conversions from simulation units

pub mod canonical;
pub mod ids;
pub mod notification;
pub mod scaling;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use ids::{CallerId, CellId, CellKey, CollectibleId, ContentHash, IdError, RunKey};
pub use notification::{Notification, NotificationKind, NotificationRecord};
pub use structs::{
    DrugDeliveryEvent, ExperienceRecord, FoodCollectionEvent, GridCell, PayloadAmount, Position3, RunStatus,
    RunSummary, SimulationRun, TumorKillEvent,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // Files are written to the `bindings/` directory relative to the
        // crate root.
        use ts_rs::TS;

        let _ = crate::ids::RunKey::export_all();
        let _ = crate::ids::CellId::export_all();
        let _ = crate::ids::CollectibleId::export_all();
        let _ = crate::ids::CallerId::export_all();
        let _ = crate::ids::ContentHash::export_all();

        let _ = crate::structs::GridCell::export_all();
        let _ = crate::structs::Position3::export_all();
        let _ = crate::structs::PayloadAmount::export_all();
        let _ = crate::structs::RunStatus::export_all();
        let _ = crate::structs::RunSummary::export_all();
        let _ = crate::structs::SimulationRun::export_all();
        let _ = crate::structs::DrugDeliveryEvent::export_all();
        let _ = crate::structs::TumorKillEvent::export_all();
        let _ = crate::structs::FoodCollectionEvent::export_all();
        let _ = crate::structs::ExperienceRecord::export_all();

        let _ = crate::notification::NotificationKind::export_all();
        let _ = crate::notification::Notification::export_all();
        let _ = crate::notification::NotificationRecord::export_all();
    }
}
