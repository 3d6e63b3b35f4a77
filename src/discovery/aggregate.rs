// src/discovery/aggregate.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::shutdown_requested;
use crate::certspotter::Issuance;

/// Every issuance known at one point in time, ordered by id
pub type Snapshot = Arc<Vec<Issuance>>;

/// Cumulative set of issuances keyed by id.
///
/// Once spawned the aggregator is owned by its task and only reachable
/// through the input channel; consumers see immutable snapshots.
#[derive(Debug, Default)]
pub struct Aggregator {
    issuances: HashMap<String, Issuance>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a batch, returning how many ids were not known before
    pub fn ingest(&mut self, batch: Vec<Issuance>) -> usize {
        let mut added = 0;
        for issuance in batch {
            if self.issuances.insert(issuance.id.clone(), issuance).is_none() {
                added += 1;
            }
        }
        added
    }

    /// Build a fresh snapshot of all known issuances
    pub fn snapshot(&self) -> Snapshot {
        let mut all: Vec<Issuance> = self.issuances.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Arc::new(all)
    }

    pub fn len(&self) -> usize {
        self.issuances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issuances.is_empty()
    }

    /// Run the aggregator as its own task.
    ///
    /// Each batch is applied and the new snapshot replaces the previous one
    /// in a single-slot watch channel: publishing never waits on the
    /// consumer, and a slow consumer only ever sees the latest snapshot.
    /// The returned receiver closes when the input closes or on shutdown.
    pub fn spawn(
        mut self,
        mut input: mpsc::Receiver<Vec<Issuance>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> (watch::Receiver<Snapshot>, JoinHandle<()>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(self.snapshot());

        let handle = tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    batch = input.recv() => match batch {
                        Some(batch) => batch,
                        None => break,
                    },
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                };

                let received = batch.len();
                let added = self.ingest(batch);
                debug!(
                    "Aggregated {} issuances ({} new, {} total)",
                    received,
                    added,
                    self.len()
                );

                snapshot_tx.send_replace(self.snapshot());
            }

            info!("Aggregator stopped with {} issuances", self.len());
        });

        (snapshot_rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn issuance(id: &str, dns: &str) -> Issuance {
        Issuance {
            id: id.to_string(),
            dns_names: vec![dns.to_string()],
            tbs_sha256: None,
            not_before: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            not_after: Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
            pubkey_sha256: None,
            issuer: None,
            certificate: None,
        }
    }

    fn ids(snapshot: &Snapshot) -> Vec<String> {
        snapshot.iter().map(|i| i.id.clone()).collect()
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let batch = vec![issuance("1", "a.com"), issuance("2", "b.com")];

        let mut once = Aggregator::new();
        once.ingest(batch.clone());

        let mut twice = Aggregator::new();
        assert_eq!(twice.ingest(batch.clone()), 2);
        assert_eq!(twice.ingest(batch), 0);

        assert_eq!(once.snapshot(), twice.snapshot());
        assert_eq!(twice.len(), 2);
    }

    #[test]
    fn test_last_write_wins() {
        let mut aggregator = Aggregator::new();
        aggregator.ingest(vec![issuance("1", "old.com")]);
        aggregator.ingest(vec![issuance("1", "new.com")]);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].dns_names, vec!["new.com".to_string()]);
    }

    #[test]
    fn test_snapshots_never_shrink() {
        let mut aggregator = Aggregator::new();
        let mut previous: HashSet<String> = HashSet::new();

        for batch in [
            vec![issuance("1", "a.com")],
            vec![],
            vec![issuance("2", "b.com"), issuance("1", "a.com")],
            vec![issuance("3", "c.com")],
        ] {
            aggregator.ingest(batch);
            let current: HashSet<String> = ids(&aggregator.snapshot()).into_iter().collect();
            assert!(current.is_superset(&previous));
            previous = current;
        }
        assert_eq!(previous.len(), 3);
    }

    #[test]
    fn test_snapshot_is_ordered_by_id() {
        let mut aggregator = Aggregator::new();
        aggregator.ingest(vec![issuance("3", "c.com"), issuance("1", "a.com"), issuance("2", "b.com")]);

        assert_eq!(ids(&aggregator.snapshot()), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_spawned_aggregator_publishes_latest_snapshot() {
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let (mut snapshots, handle) = Aggregator::new().spawn(batch_rx, shutdown_rx);

        batch_tx.send(vec![issuance("1", "a.com")]).await.unwrap();
        batch_tx.send(vec![issuance("2", "b.com")]).await.unwrap();
        batch_tx.send(vec![issuance("3", "c.com")]).await.unwrap();
        drop(batch_tx);

        // Intermediate snapshots may be skipped, the final one is never lost
        handle.await.unwrap();
        let latest = snapshots.borrow_and_update().clone();
        assert_eq!(ids(&latest), vec!["1", "2", "3"]);
        assert!(snapshots.changed().await.is_err());
    }

    #[tokio::test]
    async fn test_slow_consumer_does_not_block_ingestion() {
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        // Nobody reads the snapshots while batches flow in
        let (snapshots, _handle) = Aggregator::new().spawn(batch_rx, shutdown_rx);

        for i in 0..100 {
            batch_tx
                .send(vec![issuance(&i.to_string(), "a.com")])
                .await
                .unwrap();
        }
        drop(batch_tx);

        let mut snapshots = snapshots;
        loop {
            if snapshots.borrow_and_update().len() == 100 {
                break;
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
        assert_eq!(snapshots.borrow().len(), 100);
    }

    #[tokio::test]
    async fn test_aggregator_stops_on_shutdown() {
        let (_batch_tx, batch_rx) = mpsc::channel::<Vec<Issuance>>(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (mut snapshots, handle) = Aggregator::new().spawn(batch_rx, shutdown_rx);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(snapshots.changed().await.is_err());
    }
}
