use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::lifecycle::AppointmentService;

/// Background task that retires overdue `scheduled` appointments. A slot
/// whose instant passed more than `grace` ago moves to `no_show` with a
/// system note; anything younger stays untouched until a later sweep.
pub struct ExpirySweeper {
    service: AppointmentService,
    clock: Arc<dyn Clock>,
    grace: Duration,
    interval: StdDuration,
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub transitioned: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExpirySweeper {
    pub fn new(
        service: AppointmentService,
        clock: Arc<dyn Clock>,
        grace: Duration,
        interval: StdDuration,
    ) -> Self {
        ExpirySweeper {
            service,
            clock,
            grace,
            interval,
        }
    }

    /// One pass over the overdue candidates. Failures are counted and
    /// logged per row; the batch always runs to the end.
    pub async fn tick(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.clock.now();

        let candidates = match self.service.overdue_scheduled(now.date_naive()).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "expiry sweep could not list candidates");
                report.failed += 1;
                return report;
            }
        };
        report.examined = candidates.len();

        let note = format!(
            "Marked as no-show automatically (scheduled slot passed by more than {}h)",
            self.grace.num_hours()
        );

        for appt in candidates {
            // Candidates are matched by date; the grace window runs against
            // the exact slot instant.
            if now - appt.slot_instant() < self.grace {
                report.skipped += 1;
                continue;
            }
            match self.service.mark_no_show(appt.appointment_id, &note).await {
                Ok(Some(_)) => {
                    tracing::info!(
                        appointment_id = %appt.appointment_id,
                        slot_date = %appt.slot_date,
                        slot_time = %appt.slot_time,
                        "overdue appointment marked no_show"
                    );
                    report.transitioned += 1;
                }
                // Moved out of scheduled since we listed it.
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    tracing::warn!(
                        appointment_id = %appt.appointment_id,
                        error = %err,
                        "no_show transition failed"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Sweep immediately, then on every interval tick. Meant to be spawned
    /// alongside the HTTP server.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.tick().await;
            if report.examined > 0 || report.failed > 0 {
                tracing::info!(
                    examined = report.examined,
                    transitioned = report.transitioned,
                    skipped = report.skipped,
                    failed = report.failed,
                    "expiry sweep finished"
                );
            }
        }
    }
}
