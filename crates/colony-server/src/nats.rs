//! Relay of committed ledger notifications to NATS.
//!
//! Each notification is published as JSON on `{prefix}.{kind}`, e.g.
//! `colony.drug_delivered`. Delivery is best effort: when the relay falls
//! behind the in-process feed it re-reads the missed range from the
//! store's notification log before resuming the live feed.

use std::sync::Arc;

use colony_ledger::{FeedError, Ledger, LedgerStore, MAX_PAGE_SIZE};
use colony_types::NotificationRecord;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ServerError;

/// Publishes ledger notifications to NATS subjects.
pub struct NatsRelay {
    /// The NATS client connection.
    client: async_nats::Client,
    /// Subject prefix.
    prefix: String,
}

impl NatsRelay {
    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Nats`] if the connection fails.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, ServerError> {
        let client = async_nats::connect(url).await.map_err(|e| ServerError::Nats {
            message: format!("failed to connect to NATS at {url}: {e}"),
        })?;
        Ok(Self {
            client,
            prefix: prefix.to_owned(),
        })
    }

    /// Spawn the relay loop. It runs until the ledger's feed closes.
    pub fn spawn<S: LedgerStore>(self, ledger: Arc<Ledger<S>>) -> JoinHandle<()> {
        let mut subscription = ledger.subscribe();
        info!(prefix = %self.prefix, "NATS relay started");

        tokio::spawn(async move {
            // Highest sequence relayed so far.
            let mut relayed: u64 = 0;
            // Live records at or below this were already sent during a catch-up.
            let mut caught_up_to: u64 = 0;

            loop {
                match subscription.recv().await {
                    Ok(record) => {
                        if record.sequence <= caught_up_to {
                            continue;
                        }
                        self.publish(&record).await;
                        relayed = relayed.max(record.sequence);
                    }
                    Err(FeedError::Lagged(missed)) => {
                        warn!(missed, resume_after = relayed, "NATS relay lagged, re-reading log");
                        caught_up_to = self.catch_up(&ledger, relayed).await;
                        relayed = relayed.max(caught_up_to);
                    }
                    Err(FeedError::Closed) => break,
                }
            }
            info!("NATS relay stopped");
        })
    }

    /// Publish everything after `cursor` from the store. Returns the
    /// highest sequence published (or `cursor` if none).
    async fn catch_up<S: LedgerStore>(&self, ledger: &Ledger<S>, cursor: u64) -> u64 {
        let mut cursor = cursor;
        loop {
            let batch = match ledger.notifications_since(cursor, MAX_PAGE_SIZE).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, cursor, "NATS relay catch-up read failed");
                    return cursor;
                }
            };
            let Some(last) = batch.last().map(|r| r.sequence) else {
                return cursor;
            };
            for record in &batch {
                self.publish(record).await;
            }
            cursor = last;
        }
    }

    async fn publish(&self, record: &NotificationRecord) {
        let subject = subject_for(&self.prefix, record);
        let payload = match serde_json::to_vec(record) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, sequence = record.sequence, "failed to serialize notification");
                return;
            }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            warn!(error = %e, subject = %subject, "failed to publish notification");
        } else {
            debug!(subject = %subject, sequence = record.sequence, "notification relayed");
        }
    }
}

/// Subject a record is published on.
pub fn subject_for(prefix: &str, record: &NotificationRecord) -> String {
    format!("{prefix}.{}", record.notification.kind().as_str())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use chrono::Utc;
    use colony_types::{CallerId, Notification, RunKey};

    use super::*;

    #[test]
    fn subjects_are_prefixed_by_kind() {
        let record = NotificationRecord {
            sequence: 1,
            recorded_at: Utc::now(),
            notification: Notification::SimulationInitialized {
                run_key: RunKey::from_label("run-A"),
                caller: CallerId::new("u1").expect("caller"),
            },
        };
        assert_eq!(subject_for("colony", &record), "colony.simulation_initialized");
        assert_eq!(subject_for("lab.eu", &record), "lab.eu.simulation_initialized");
    }
}
