//! Sync engine: drains outboxes upstream and refreshes the mirror downstream.
//!
//! ```text
//! Idle → SyncingUp → Idle
//! Idle → SyncingDown → Idle
//! Idle → SyncingUp → SyncingDown → Idle   (full sync, one guard)
//! ```
//!
//! Entering a phase while another is active is a skip, not an error.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::outbox::Delta;
use crate::domain::{
    ClientDelta, DownReport, FamilyReport, FullSyncReport, MirrorSnapshot, MirrorTable,
    OrderDelta, Outcome, QuoteDelta, Result, SkipReason, SyncPhase, UpReport,
};
use crate::infrastructure::{ConnectivityOracle, LocalStore, RemoteDelta, RemoteStore};

/// Holds the engine in a non-idle phase; resets it to idle on drop.
struct PhaseGuard<'a> {
    phase: &'a Mutex<SyncPhase>,
}

impl PhaseGuard<'_> {
    fn advance(&self, next: SyncPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = SyncPhase::Idle;
    }
}

/// Coordinates the local store, the remote store and the connectivity oracle.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    oracle: Arc<dyn ConnectivityOracle>,
    phase: Mutex<SyncPhase>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        oracle: Arc<dyn ConnectivityOracle>,
    ) -> Self {
        Self {
            store,
            remote,
            oracle,
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically move from idle to `phase`.
    fn try_enter(&self, phase: SyncPhase) -> std::result::Result<PhaseGuard<'_>, SyncPhase> {
        let mut current = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != SyncPhase::Idle {
            return Err(*current);
        }
        *current = phase;
        Ok(PhaseGuard { phase: &self.phase })
    }

    /// Check preconditions in order: store active, engine idle, online.
    async fn acquire(&self, phase: SyncPhase) -> std::result::Result<PhaseGuard<'_>, SkipReason> {
        if !self.store.is_active().await {
            return Err(SkipReason::StoreInactive);
        }
        let guard = self.try_enter(phase).map_err(SkipReason::Busy)?;
        if !self.oracle.is_online().await {
            return Err(SkipReason::Offline);
        }
        Ok(guard)
    }

    /// Replay every pending outbox entry against the remote store.
    ///
    /// Families drain in order (clients, quotes, orders), entries in sequence
    /// order. A failed entry stays queued and the loop moves on; a family
    /// whose outbox cannot be read is counted as failed.
    ///
    /// # Errors
    /// Never returns `Err`; per-family failures are counted in the report.
    pub async fn sync_up(&self) -> Result<Outcome<UpReport>> {
        let guard = match self.acquire(SyncPhase::SyncingUp).await {
            Ok(guard) => guard,
            Err(reason) => {
                info!(%reason, "Sync-Up skipped");
                return Ok(Outcome::Skipped(reason));
            }
        };

        let report = self.drain_outboxes().await;
        drop(guard);
        Ok(Outcome::Done(report))
    }

    /// Replace the mirror with a fresh copy of the remote state.
    ///
    /// Refuses to run while any outbox entry is pending, since the refresh
    /// would hide those writes until they are drained.
    ///
    /// # Errors
    /// Returns error if any fetch or the local replace fails. The mirror is
    /// untouched in that case.
    pub async fn sync_down(&self) -> Result<Outcome<DownReport>> {
        let guard = match self.acquire(SyncPhase::SyncingDown).await {
            Ok(guard) => guard,
            Err(reason) => {
                info!(%reason, "Sync-Down skipped");
                return Ok(Outcome::Skipped(reason));
            }
        };

        let pending = self.store.pending_outbox_total().await?;
        if pending > 0 {
            let reason = SkipReason::PendingOutbox(pending);
            info!(%reason, "Sync-Down skipped");
            return Ok(Outcome::Skipped(reason));
        }

        let report = self.refresh_mirror().await;
        drop(guard);
        match report {
            Ok(report) => Ok(Outcome::Done(report)),
            Err(e) => {
                error!(error = %e, "Sync-Down failed");
                Err(e)
            }
        }
    }

    /// Sync-Up followed by Sync-Down under one guard. Never fails; errors of
    /// either phase are captured in the report.
    pub async fn full_sync(&self) -> FullSyncReport {
        let guard = match self.acquire(SyncPhase::SyncingUp).await {
            Ok(guard) => guard,
            Err(reason) => {
                info!(%reason, "Full sync skipped");
                return FullSyncReport::skipped(reason);
            }
        };

        let mut report = FullSyncReport {
            up: None,
            down: None,
            skipped: None,
            errors: Vec::new(),
        };

        report.up = Some(self.drain_outboxes().await);

        // Outbox tables are not part of the mirror; refreshing keeps failed
        // entries queued.
        guard.advance(SyncPhase::SyncingDown);
        match self.refresh_mirror().await {
            Ok(down) => report.down = Some(down),
            Err(e) => {
                error!(error = %e, "Sync-Down failed");
                report.errors.push(format!("sync-down: {e}"));
            }
        }

        info!(
            complete = report.is_complete(),
            errors = report.errors.len(),
            "Full sync finished"
        );
        report
    }

    /// Run `sync_up` on every offline to online transition of the oracle.
    pub fn spawn_reconnect_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut rx = self.oracle.subscribe();

        tokio::spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    info!("Connection restored, draining outboxes");
                    match engine.sync_up().await {
                        Ok(Outcome::Done(report)) => info!(
                            applied = report.applied(),
                            failed = report.failed(),
                            "Reconnect Sync-Up finished"
                        ),
                        Ok(Outcome::Skipped(reason)) => {
                            debug!(%reason, "Reconnect Sync-Up skipped");
                        }
                        Err(e) => error!(error = %e, "Reconnect Sync-Up failed"),
                    }
                }
                was_online = online;
            }
            debug!("Connectivity channel closed, reconnect listener stopped");
        })
    }

    async fn drain_outboxes(&self) -> UpReport {
        let mut report = UpReport::default();
        report.record(ClientDelta::FAMILY, self.drain_family::<ClientDelta>().await);
        report.record(QuoteDelta::FAMILY, self.drain_family::<QuoteDelta>().await);
        report.record(OrderDelta::FAMILY, self.drain_family::<OrderDelta>().await);

        info!(
            applied = report.applied(),
            failed = report.failed(),
            "Sync-Up finished"
        );
        report
    }

    /// Drain one family. A family that cannot be read counts every queued
    /// entry as failed and does not stop the next family.
    async fn drain_family<D: RemoteDelta>(&self) -> FamilyReport {
        let family = D::FAMILY;
        match self.drain::<D>().await {
            Ok(report) => report,
            Err(e) => {
                error!(%family, error = %e, "Outbox could not be drained");
                FamilyReport {
                    applied: 0,
                    failed: self.store.outbox_len(family).await.unwrap_or_default(),
                }
            }
        }
    }

    async fn drain<D: RemoteDelta>(&self) -> Result<FamilyReport> {
        let family = D::FAMILY;
        let entries = self.store.list_outbox::<D>().await?;
        let queued = self.store.outbox_len(family).await?;

        let mut report = FamilyReport {
            applied: 0,
            // Rows that no longer decode stay queued and count as failures.
            failed: queued.saturating_sub(entries.len()),
        };

        for entry in entries {
            let sequence = entry.sequence;
            let action = entry.delta.action();

            if let Err(e) = entry.delta.apply_to(self.remote.as_ref()).await {
                warn!(
                    %family,
                    sequence,
                    action,
                    subject = entry.delta.subject_id(),
                    error = %e,
                    "Outbox entry rejected, kept for retry"
                );
                report.failed += 1;
                continue;
            }

            match self.store.remove_outbox_entry(family, sequence).await {
                Ok(()) => {
                    debug!(%family, sequence, action, "Outbox entry applied");
                    report.applied += 1;
                }
                Err(e) => {
                    // Applied remotely but still queued; replay is idempotent.
                    warn!(%family, sequence, error = %e, "Failed to remove applied outbox entry");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn refresh_mirror(&self) -> Result<DownReport> {
        let units = self.remote.fetch_units().await?;
        let ingredients = self.remote.fetch_ingredients().await?;
        let order_statuses = self.remote.fetch_order_statuses().await?;
        let clients = self.remote.fetch_clients().await?;
        let quotes = self.remote.fetch_quotes().await?;
        let orders = self.remote.fetch_orders().await?;

        let snapshot =
            MirrorSnapshot::assemble(units, ingredients, order_statuses, clients, quotes, orders);
        self.store.replace_all(&snapshot).await?;

        let mut report = DownReport::default();
        for table in MirrorTable::ALL {
            report.record(table, snapshot.row_count(table));
        }

        info!(rows = report.total_rows(), "Sync-Down finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::outbox::Family;
    use crate::domain::{NewClient, NewOrder, OrderStatusKind};
    use crate::infrastructure::ManualOracle;
    use crate::testing::{client, sample_snapshot, ts, FakeRemote};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: Arc<LocalStore>,
        remote: Arc<FakeRemote>,
        oracle: Arc<ManualOracle>,
        engine: Arc<SyncEngine>,
    }

    async fn harness(remote: FakeRemote, online: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path().join("sippa.db")).await);
        let remote = Arc::new(remote);
        let oracle = Arc::new(ManualOracle::new(online));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::clone(&oracle) as Arc<dyn ConnectivityOracle>,
        ));
        Harness {
            _dir: dir,
            store,
            remote,
            oracle,
            engine,
        }
    }

    fn exec_raw(store: &LocalStore, sql: &str) {
        let conn = rusqlite::Connection::open(store.path()).unwrap();
        conn.execute_batch(sql).unwrap();
    }

    async fn queue_clients(store: &LocalStore, ids: &[&str]) -> Vec<i64> {
        let mut sequences = Vec::new();
        for id in ids {
            let seq = store
                .append_outbox(&ClientDelta::Insert(client(id, id)))
                .await
                .unwrap()
                .unwrap();
            sequences.push(seq);
        }
        sequences
    }

    #[tokio::test]
    async fn test_sync_down_twice_gives_same_mirror() {
        let h = harness(FakeRemote::with_snapshot(sample_snapshot()), true).await;

        let first = h.engine.sync_down().await.unwrap().done().unwrap();
        let after_first = h.store.snapshot().await.unwrap();
        let second = h.engine.sync_down().await.unwrap().done().unwrap();
        let after_second = h.store.snapshot().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(after_first, after_second);
        assert_eq!(first.total_rows(), sample_snapshot().total_rows());
        assert_eq!(h.engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_sync_up_drains_and_acks_in_order() {
        let h = harness(FakeRemote::new(), true).await;
        queue_clients(&h.store, &["a", "b", "c"]).await;

        let report = h.engine.sync_up().await.unwrap().done().unwrap();

        assert_eq!(report.family(Family::Clients).applied, 3);
        assert_eq!(report.failed(), 0);
        assert_eq!(h.store.pending_outbox_total().await.unwrap(), 0);
        let subjects: Vec<_> = h.remote.applied().into_iter().map(|(_, s)| s).collect();
        assert_eq!(subjects, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failed_entry_stays_queued_and_later_entries_proceed() {
        let h = harness(FakeRemote::new(), true).await;
        let sequences = queue_clients(&h.store, &["a", "b", "c"]).await;
        h.remote.fail_subject("b");

        let report = h.engine.sync_up().await.unwrap().done().unwrap();
        assert_eq!(
            report.family(Family::Clients),
            FamilyReport {
                applied: 2,
                failed: 1
            }
        );
        let left: Vec<_> = h
            .store
            .list_outbox::<ClientDelta>()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(left, vec![sequences[1]]);

        h.remote.heal_subject("b");
        let report = h.engine.sync_up().await.unwrap().done().unwrap();
        assert_eq!(report.applied(), 1);
        assert_eq!(h.store.pending_outbox_total().await.unwrap(), 0);
        assert_eq!(h.remote.client_ids(), vec!["a", "c", "b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_phases_are_mutually_exclusive() {
        let (remote, gate) = FakeRemote::gated(sample_snapshot());
        let h = harness(remote, true).await;

        let engine = Arc::clone(&h.engine);
        let down = tokio::spawn(async move { engine.sync_down().await });
        h.remote.fetch_entered.notified().await;

        assert_eq!(h.engine.phase(), SyncPhase::SyncingDown);
        assert_eq!(
            h.engine.sync_up().await.unwrap(),
            Outcome::Skipped(SkipReason::Busy(SyncPhase::SyncingDown))
        );
        assert_eq!(
            h.engine.full_sync().await.skipped,
            Some(SkipReason::Busy(SyncPhase::SyncingDown))
        );

        gate.add_permits(1);
        assert!(down.await.unwrap().unwrap().is_done());
        assert_eq!(h.engine.phase(), SyncPhase::Idle);
        assert!(h.engine.sync_up().await.unwrap().is_done());
    }

    #[tokio::test]
    async fn test_offline_writes_reach_remote_and_mirror_on_full_sync() {
        let h = harness(FakeRemote::with_snapshot(sample_snapshot()), false).await;

        let luz = NewClient {
            first_name: "Luz".into(),
            last_name: "Mar".into(),
            ..Default::default()
        }
        .with_id("c-new");
        h.store
            .append_outbox(&ClientDelta::Insert(luz.clone()))
            .await
            .unwrap();
        h.store
            .append_outbox(&OrderDelta::Insert(NewOrder {
                id: "o-new".into(),
                client_id: luz.id.clone(),
                new_client: None,
                quote_id: None,
                delivery_date: ts(2031, 6, 1),
                price: 80.0,
            }))
            .await
            .unwrap();
        h.store
            .append_outbox(&OrderDelta::status_change("o-1", OrderStatusKind::Delivered))
            .await
            .unwrap();

        assert_eq!(
            h.engine.full_sync().await.skipped,
            Some(SkipReason::Offline)
        );

        h.oracle.set_online(true);
        let report = h.engine.full_sync().await;

        assert!(report.is_complete(), "{report:?}");
        assert_eq!(report.up.as_ref().unwrap().applied(), 3);
        assert_eq!(h.store.pending_outbox_total().await.unwrap(), 0);

        let orders = h.store.orders().await.unwrap();
        let new = orders.iter().find(|o| o.id == "o-new").unwrap();
        assert_eq!(new.client_display_name(), "Luz Mar");
        assert_eq!(new.status_kind(), Some(OrderStatusKind::Pending));
        let old = orders.iter().find(|o| o.id == "o-1").unwrap();
        assert_eq!(old.status_kind(), Some(OrderStatusKind::Delivered));
        assert_eq!(h.engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_reconnect_drains_outbox_without_refresh() {
        let h = harness(FakeRemote::new(), false).await;
        queue_clients(&h.store, &["a", "b"]).await;
        let listener = h.engine.spawn_reconnect_listener();

        h.oracle.set_online(true);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while h.store.pending_outbox_total().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(drained.is_ok(), "outbox was not drained after reconnect");
        assert_eq!(h.remote.applied().len(), 2);
        assert_eq!(h.remote.fetch_calls(), 0);
        listener.abort();
    }

    #[tokio::test]
    async fn test_offline_sync_is_noop() {
        let h = harness(FakeRemote::with_snapshot(sample_snapshot()), false).await;
        queue_clients(&h.store, &["a"]).await;

        assert_eq!(
            h.engine.sync_up().await.unwrap(),
            Outcome::Skipped(SkipReason::Offline)
        );
        assert_eq!(
            h.engine.sync_down().await.unwrap(),
            Outcome::Skipped(SkipReason::Offline)
        );
        assert_eq!(h.engine.phase(), SyncPhase::Idle);
        assert_eq!(h.store.outbox_len(Family::Clients).await.unwrap(), 1);
        assert!(h.remote.applied().is_empty());
        assert_eq!(h.remote.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_mirror_untouched() {
        let mut changed = sample_snapshot();
        changed.clients.push(client("c-2", "Bea"));
        let h = harness(FakeRemote::with_snapshot(changed), true).await;
        h.store.replace_all(&sample_snapshot()).await.unwrap();
        h.remote.fail_fetches(true);

        assert!(h.engine.sync_down().await.is_err());
        assert_eq!(h.store.snapshot().await.unwrap(), sample_snapshot());
        assert_eq!(h.engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_unreadable_family_does_not_block_later_families() {
        let h = harness(FakeRemote::new(), true).await;
        queue_clients(&h.store, &["a"]).await;
        h.store
            .append_outbox(&OrderDelta::status_change("o-1", OrderStatusKind::Delivered))
            .await
            .unwrap();
        exec_raw(&h.store, "UPDATE outbox_clients SET created_at = 'garbage'");

        let report = h.engine.sync_up().await.unwrap().done().unwrap();

        assert_eq!(
            report.family(Family::Clients),
            FamilyReport {
                applied: 0,
                failed: 1
            }
        );
        assert_eq!(report.family(Family::Orders).applied, 1);
        assert_eq!(h.store.outbox_len(Family::Clients).await.unwrap(), 1);
        assert_eq!(h.store.outbox_len(Family::Orders).await.unwrap(), 0);
        assert_eq!(
            h.remote.applied(),
            vec![("UPDATE_STATUS_DELIVERED".to_string(), "o-1".to_string())]
        );
        assert_eq!(h.engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_missing_outbox_table_does_not_stop_sync_up() {
        let h = harness(FakeRemote::new(), true).await;
        h.store
            .append_outbox(&OrderDelta::status_change("o-1", OrderStatusKind::Cancelled))
            .await
            .unwrap();
        exec_raw(&h.store, "DROP TABLE outbox_quotes");

        let report = h.engine.sync_up().await.unwrap().done().unwrap();

        assert_eq!(report.family(Family::Quotes), FamilyReport::default());
        assert_eq!(report.family(Family::Orders).applied, 1);
        assert_eq!(h.store.outbox_len(Family::Orders).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bare_sync_down_refused_while_outbox_pending() {
        let h = harness(FakeRemote::with_snapshot(sample_snapshot()), true).await;
        queue_clients(&h.store, &["a"]).await;

        assert_eq!(
            h.engine.sync_down().await.unwrap(),
            Outcome::Skipped(SkipReason::PendingOutbox(1))
        );
        assert_eq!(h.remote.fetch_calls(), 0);
        assert_eq!(h.engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_full_sync_reports_phase_errors() {
        let h = harness(FakeRemote::with_snapshot(sample_snapshot()), true).await;
        queue_clients(&h.store, &["a", "b"]).await;
        h.remote.fail_subject("a");
        h.remote.fail_fetches(true);

        let report = h.engine.full_sync().await;

        assert!(!report.is_complete());
        assert_eq!(report.up.as_ref().unwrap().failed(), 1);
        assert!(report.down.is_none());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(h.store.outbox_len(Family::Clients).await.unwrap(), 1);
        assert_eq!(h.engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_inactive_store_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let store = Arc::new(LocalStore::open(blocker.join("sippa.db")).await);
        let engine = SyncEngine::new(
            store,
            Arc::new(FakeRemote::new()),
            Arc::new(ManualOracle::new(true)),
        );

        assert_eq!(
            engine.sync_up().await.unwrap(),
            Outcome::Skipped(SkipReason::StoreInactive)
        );
        assert_eq!(
            engine.full_sync().await.skipped,
            Some(SkipReason::StoreInactive)
        );
    }
}
