//! Background sweep that expires reservations left unconfirmed.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use spacebook_core::db::unix_timestamp;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{BookingError, ReservationStateMachine};
use crate::storage::SpacebookDatabase;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Pending reservations inspected.
    pub scanned: usize,
    /// Reservations this sweep moved to `expired`.
    pub expired: usize,
    /// Reservations whose expiry failed and will be retried next sweep.
    pub failed: usize,
    /// Penalizations deactivated because their window elapsed.
    pub penalties_lifted: u64,
}

/// Periodically expires pending reservations past their deadline.
pub struct PenalizationMonitor {
    machine: Arc<ReservationStateMachine>,
    db: SpacebookDatabase,
    interval: Duration,
}

impl PenalizationMonitor {
    pub fn new(
        machine: Arc<ReservationStateMachine>,
        db: SpacebookDatabase,
        interval: Duration,
    ) -> Self {
        Self {
            machine,
            db,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Run one sweep as of `now`.
    ///
    /// A reservation that fails to expire is logged and left for the next
    /// sweep; it does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` only if the pending reservations cannot be listed.
    pub async fn sweep_at(&self, now: i64) -> Result<SweepReport, BookingError> {
        let pending = self.machine.pending().await?;
        let policy = *self.machine.policy();
        let mut report = SweepReport {
            scanned: pending.len(),
            ..SweepReport::default()
        };

        for reservation in pending
            .iter()
            .filter(|r| policy.is_overdue(r.created_at, now))
        {
            match self.machine.expire(&reservation.id, now).await {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                // Confirmed or rejected since the listing; nothing to do.
                Err(BookingError::InvalidTransition { .. } | BookingError::ReservationNotFound(_)) => {}
                Err(e) => {
                    warn!(reservation_id = %reservation.id, error = %e, "Failed to expire reservation");
                    report.failed += 1;
                }
            }
        }

        match self.db.deactivate_elapsed_penalties(now).await {
            Ok(lifted) => report.penalties_lifted = lifted,
            Err(e) => warn!(error = %e, "Failed to deactivate elapsed penalizations"),
        }

        if report.expired > 0 || report.failed > 0 || report.penalties_lifted > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                failed = report.failed,
                penalties_lifted = report.penalties_lifted,
                "Penalization sweep complete"
            );
        } else {
            debug!(scanned = report.scanned, "Penalization sweep found nothing to do");
        }

        Ok(report)
    }

    /// Spawn the sweep loop on the current runtime.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        MonitorHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Penalization monitor started");

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; sweep only after one interval.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.sweep_at(unix_timestamp()).await {
                        error!(error = %e, "Penalization sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Penalization monitor shutting down");
                    return;
                }
            }
        }
    }
}

/// Running monitor task.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop to stop and wait for it. A sweep in progress finishes
    /// first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Penalization monitor task failed");
        }
    }
}
