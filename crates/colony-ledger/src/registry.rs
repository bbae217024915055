//! Run registry: the lifecycle state machine of a simulation run.
//!
//! ```text
//! Uninitialized --initialize_simulation--> Active --complete_simulation--> Completed
//! ```
//!
//! Initialization happens exactly once per run key. Completion happens
//! exactly once and only by the submitter, the identity that initialized
//! the run: the summary counters are a claim about the run's outcome and
//! only the run's owner may assert it.

use chrono::Utc;
use colony_types::{CallerId, Notification, RunKey, RunStatus, RunSummary, SimulationRun};
use tracing::{info, warn};

use crate::LedgerError;
use crate::ledger::Ledger;
use crate::store::{LedgerStore, PendingNotification, RunTransition};

/// Validate and apply a completion to `run`.
///
/// Checks, in order: the run exists, it is not already completed, and
/// `caller` is its submitter. On success returns the completed record.
///
/// # Errors
///
/// [`LedgerError::RunNotInitialized`], [`LedgerError::RunAlreadyCompleted`]
/// or [`LedgerError::Unauthorized`].
pub fn complete_run(
    mut run: SimulationRun,
    caller: &CallerId,
    summary: RunSummary,
) -> Result<SimulationRun, LedgerError> {
    let run_key = run.run_key;
    match run.status() {
        RunStatus::Uninitialized => return Err(LedgerError::RunNotInitialized { run_key }),
        RunStatus::Completed => return Err(LedgerError::RunAlreadyCompleted { run_key }),
        RunStatus::Active => {}
    }
    if run.submitter.as_ref() != Some(caller) {
        return Err(LedgerError::Unauthorized {
            run_key,
            caller: caller.clone(),
        });
    }

    run.total_steps = summary.total_steps;
    run.cells_killed = summary.cells_killed;
    run.drug_deliveries = summary.drug_deliveries;
    run.completed = true;
    Ok(run)
}

impl<S: LedgerStore> Ledger<S> {
    /// Initialize run `run_key` with `caller` as its submitter.
    ///
    /// Creates an active record with the current time as start time and
    /// zeroed counters, and emits `SimulationInitialized`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::RunAlreadyExists`] if the key already has a record,
    /// whatever its status and whoever created it.
    pub async fn initialize_simulation(
        &self,
        caller: &CallerId,
        run_key: RunKey,
    ) -> Result<SimulationRun, LedgerError> {
        let now = Utc::now();
        let run = SimulationRun::started(run_key, caller.clone(), now);
        let pending = PendingNotification::new(
            Notification::SimulationInitialized {
                run_key,
                caller: caller.clone(),
            },
            now,
        );

        let Some(record) = self.store.create_run(run.clone(), pending, &self.feed).await? else {
            warn!(%run_key, %caller, "Rejected initialization of existing run");
            return Err(LedgerError::RunAlreadyExists { run_key });
        };

        info!(%run_key, %caller, sequence = record.sequence, "Simulation run initialized");
        Ok(run)
    }

    /// Complete run `run_key` with the submitter's summary counters.
    ///
    /// Writes the counters, marks the run completed, and emits
    /// `SimulationCompleted`, all in one store transaction.
    ///
    /// # Errors
    ///
    /// [`LedgerError::RunNotInitialized`], [`LedgerError::RunAlreadyCompleted`],
    /// [`LedgerError::Unauthorized`]; the record is unchanged in each case.
    pub async fn complete_simulation(
        &self,
        caller: &CallerId,
        run_key: RunKey,
        summary: RunSummary,
    ) -> Result<SimulationRun, LedgerError> {
        let submitter = caller.clone();
        let transition = move |current: SimulationRun| -> Result<RunTransition, LedgerError> {
            let run = complete_run(current, &submitter, summary)?;
            let pending = PendingNotification::new(
                Notification::SimulationCompleted {
                    run_key,
                    total_steps: summary.total_steps,
                    cells_killed: summary.cells_killed,
                    drug_deliveries: summary.drug_deliveries,
                    caller: submitter,
                },
                Utc::now(),
            );
            Ok(RunTransition { run, pending })
        };
        let result = self.store.transition_run(run_key, transition, &self.feed).await;

        match result {
            Ok((run, record)) => {
                info!(
                    %run_key,
                    %caller,
                    total_steps = summary.total_steps,
                    cells_killed = summary.cells_killed,
                    drug_deliveries = summary.drug_deliveries,
                    sequence = record.sequence,
                    "Simulation run completed"
                );
                Ok(run)
            }
            Err(err) => {
                warn!(%run_key, %caller, code = err.code(), "Rejected run completion");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use crate::MemoryStore;

    use super::*;

    fn user(name: &str) -> CallerId {
        CallerId::new(name).expect("caller")
    }

    const SUMMARY: RunSummary = RunSummary {
        total_steps: 500,
        cells_killed: 12,
        drug_deliveries: 3,
    };

    #[test]
    fn complete_run_checks_existence_first() {
        let run = SimulationRun::uninitialized(RunKey::from_label("k"));
        let err = complete_run(run, &user("U1"), SUMMARY);
        assert!(matches!(err, Err(LedgerError::RunNotInitialized { .. })));
    }

    #[test]
    fn complete_run_reports_completion_before_authorization() {
        let mut run = SimulationRun::started(RunKey::from_label("k"), user("U1"), Utc::now());
        run.completed = true;
        let err = complete_run(run, &user("U2"), SUMMARY);
        assert!(matches!(err, Err(LedgerError::RunAlreadyCompleted { .. })));
    }

    #[test]
    fn complete_run_writes_summary() {
        let run = SimulationRun::started(RunKey::from_label("k"), user("U1"), Utc::now());
        let done = complete_run(run, &user("U1"), SUMMARY).expect("complete");
        assert!(done.completed);
        assert_eq!(done.summary(), SUMMARY);
        assert_eq!(done.submitter, Some(user("U1")));
    }

    #[tokio::test]
    async fn second_initialization_fails_and_keeps_first_submitter() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("run-A");

        let run = ledger.initialize_simulation(&user("U1"), key).await.expect("init");
        assert_eq!(run.status(), RunStatus::Active);

        let err = ledger.initialize_simulation(&user("U2"), key).await;
        assert!(matches!(err, Err(LedgerError::RunAlreadyExists { .. })));

        let stored = ledger.simulation_run(key).await.expect("read");
        assert_eq!(stored.submitter, Some(user("U1")));
        assert!(!stored.completed);
    }

    #[tokio::test]
    async fn lifecycle_scenario() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("run-A");
        ledger.initialize_simulation(&user("U1"), key).await.expect("init");

        let err = ledger.complete_simulation(&user("U2"), key, SUMMARY).await;
        assert!(matches!(err, Err(LedgerError::Unauthorized { .. })));
        let unchanged = ledger.simulation_run(key).await.expect("read");
        assert!(!unchanged.completed);
        assert_eq!(unchanged.cells_killed, 0);

        let done = ledger.complete_simulation(&user("U1"), key, SUMMARY).await.expect("complete");
        assert!(done.completed);
        assert_eq!(ledger.simulation_run(key).await.expect("read").cells_killed, 12);

        let again = ledger.complete_simulation(&user("U1"), key, SUMMARY).await;
        assert!(matches!(again, Err(LedgerError::RunAlreadyCompleted { .. })));
    }

    #[tokio::test]
    async fn completing_unknown_run_fails() {
        let ledger = Ledger::new(MemoryStore::new());
        let err = ledger
            .complete_simulation(&user("U1"), RunKey::from_label("ghost"), SUMMARY)
            .await;
        assert!(matches!(err, Err(LedgerError::RunNotInitialized { .. })));
        assert_eq!(ledger.latest_sequence().await.expect("seq"), 0);
    }

    #[tokio::test]
    async fn completion_is_published() {
        let ledger = Ledger::new(MemoryStore::new());
        let key = RunKey::from_label("published");
        let mut sub = ledger.subscribe_kinds([colony_types::NotificationKind::SimulationCompleted]);
        ledger.initialize_simulation(&user("U1"), key).await.expect("init");
        ledger.complete_simulation(&user("U1"), key, SUMMARY).await.expect("complete");

        let record = sub.recv().await.expect("notification");
        assert_eq!(
            record.notification,
            Notification::SimulationCompleted {
                run_key: key,
                total_steps: 500,
                cells_killed: 12,
                drug_deliveries: 3,
                caller: user("U1"),
            }
        );
        assert_eq!(record.sequence, 2);
    }
}
