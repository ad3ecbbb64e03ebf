use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use turnosplus_server::clock::{Clock, ManualClock};
use turnosplus_server::error::AppointmentError;
use turnosplus_server::lifecycle::{AppointmentDraft, AppointmentService};
use turnosplus_server::models::{
    Appointment, AppointmentFilter, AppointmentPatch, AppointmentState, NewAppointment,
    SummaryCounts,
};
use turnosplus_server::policy::{Caller, PolicyConfig};
use turnosplus_server::store::memory::MemoryAppointmentStore;
use turnosplus_server::store::AppointmentStore;
use turnosplus_server::sweeper::{ExpirySweeper, SweepReport};

const GRACE_HOURS: i64 = 48;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

struct Harness {
    service: AppointmentService,
    sweeper: ExpirySweeper,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryAppointmentStore::with_clock(clock.clone()));
    let service = AppointmentService::new(store, clock.clone(), PolicyConfig::default());
    let sweeper = ExpirySweeper::new(
        service.clone(),
        clock.clone(),
        Duration::hours(GRACE_HOURS),
        StdDuration::from_secs(3600),
    );
    Harness {
        service,
        sweeper,
        clock,
    }
}

/// Admin-created bookings start out scheduled, which is exactly what the
/// sweeper looks for.
async fn schedule(service: &AppointmentService, date: &str, time: &str) -> Appointment {
    let admin = Caller::Admin(Uuid::new_v4());
    service
        .request(
            &admin,
            Some(Uuid::new_v4()),
            AppointmentDraft {
                slot_date: date.into(),
                slot_time: time.into(),
                reason: "Consulta general".into(),
                extra_description: None,
            },
        )
        .await
        .unwrap()
}

async fn status_of(service: &AppointmentService, id: Uuid) -> AppointmentState {
    let admin = Caller::Admin(Uuid::new_v4());
    service.get(&admin, id).await.unwrap().status
}

#[tokio::test]
async fn test_overdue_scheduled_rows_become_no_show() {
    let h = harness();
    let appt = schedule(&h.service, "2026-03-02", "10:00").await;

    // forty-nine hours past the slot
    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 4, 11, 0, 0).unwrap());

    let report = h.sweeper.tick().await;
    assert_eq!(
        report,
        SweepReport {
            examined: 1,
            transitioned: 1,
            skipped: 0,
            failed: 0,
        }
    );

    let admin = Caller::Admin(Uuid::new_v4());
    let swept = h.service.get(&admin, appt.appointment_id).await.unwrap();
    assert_eq!(swept.status, AppointmentState::NoShow);
    assert!(swept
        .notes
        .as_deref()
        .unwrap()
        .contains("scheduled slot passed by more than 48h"));
}

#[tokio::test]
async fn test_rows_inside_the_grace_window_wait() {
    let h = harness();
    let appt = schedule(&h.service, "2026-03-02", "10:00").await;

    // forty-seven hours past the slot, one short of the grace
    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap());

    let report = h.sweeper.tick().await;
    assert_eq!(
        report,
        SweepReport {
            examined: 1,
            transitioned: 0,
            skipped: 1,
            failed: 0,
        }
    );
    assert_eq!(
        status_of(&h.service, appt.appointment_id).await,
        AppointmentState::Scheduled
    );
}

#[tokio::test]
async fn test_mixed_batch_retires_only_the_overdue() {
    let h = harness();
    let overdue = schedule(&h.service, "2026-03-02", "09:00").await;
    let waiting = schedule(&h.service, "2026-03-03", "09:00").await;

    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap());

    let report = h.sweeper.tick().await;
    assert_eq!(
        report,
        SweepReport {
            examined: 2,
            transitioned: 1,
            skipped: 1,
            failed: 0,
        }
    );
    assert_eq!(
        status_of(&h.service, overdue.appointment_id).await,
        AppointmentState::NoShow
    );
    assert_eq!(
        status_of(&h.service, waiting.appointment_id).await,
        AppointmentState::Scheduled
    );
}

#[tokio::test]
async fn test_requested_rows_are_never_swept() {
    let h = harness();
    let patient = Caller::Patient(Uuid::new_v4());
    let appt = h
        .service
        .request(
            &patient,
            None,
            AppointmentDraft {
                slot_date: "2026-03-02".into(),
                slot_time: "10:00".into(),
                reason: "Limpieza dental".into(),
                extra_description: None,
            },
        )
        .await
        .unwrap();

    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap());

    let report = h.sweeper.tick().await;
    assert_eq!(report, SweepReport::default());
    assert_eq!(
        status_of(&h.service, appt.appointment_id).await,
        AppointmentState::Requested
    );
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let h = harness();
    let appt = schedule(&h.service, "2026-03-02", "10:00").await;

    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap());

    let first = h.sweeper.tick().await;
    assert_eq!(first.transitioned, 1);

    let second = h.sweeper.tick().await;
    assert_eq!(second, SweepReport::default());

    // the system note was appended exactly once
    let admin = Caller::Admin(Uuid::new_v4());
    let swept = h.service.get(&admin, appt.appointment_id).await.unwrap();
    assert_eq!(
        swept.notes.as_deref(),
        Some("Marked as no-show automatically (scheduled slot passed by more than 48h)")
    );
}

/* =========================
   Failure injection
   ========================= */

/// Delegates everything to the in-memory store but fails `transition` for one
/// chosen appointment.
struct FlakyStore {
    inner: MemoryAppointmentStore,
    poisoned: Mutex<Option<Uuid>>,
}

impl FlakyStore {
    fn new(clock: Arc<dyn Clock>) -> Self {
        FlakyStore {
            inner: MemoryAppointmentStore::with_clock(clock),
            poisoned: Mutex::new(None),
        }
    }

    fn poison(&self, id: Uuid) {
        *self.poisoned.lock().unwrap() = Some(id);
    }
}

#[async_trait]
impl AppointmentStore for FlakyStore {
    async fn create(&self, new: NewAppointment) -> Result<Appointment, AppointmentError> {
        self.inner.create(new).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.find_by_id(id).await
    }

    async fn find_active_by_slot(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        exclude: Option<Uuid>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.find_active_by_slot(date, time, exclude).await
    }

    async fn update_fields(
        &self,
        id: Uuid,
        patch: AppointmentPatch,
        expected: &[AppointmentState],
    ) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.update_fields(id, patch, expected).await
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: &[AppointmentState],
        to: AppointmentState,
        note: Option<&str>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        if *self.poisoned.lock().unwrap() == Some(id) {
            return Err(AppointmentError::Store("injected failure".into()));
        }
        self.inner.transition(id, expected, to, note).await
    }

    async fn count_active_for_patient(
        &self,
        patient_id: Uuid,
        from: NaiveDate,
    ) -> Result<i64, AppointmentError> {
        self.inner.count_active_for_patient(patient_id, from).await
    }

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.list(filter).await
    }

    async fn list_requested(&self) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.list_requested().await
    }

    async fn list_overdue_scheduled(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.list_overdue_scheduled(as_of).await
    }

    async fn summary_counts(&self, today: NaiveDate) -> Result<SummaryCounts, AppointmentError> {
        self.inner.summary_counts(today).await
    }

    async fn hard_delete(&self, id: Uuid) -> Result<bool, AppointmentError> {
        self.inner.hard_delete(id).await
    }
}

#[tokio::test]
async fn test_a_failing_row_does_not_stop_the_batch() {
    let clock = Arc::new(ManualClock::new(start()));
    let flaky = Arc::new(FlakyStore::new(clock.clone()));
    let service = AppointmentService::new(flaky.clone(), clock.clone(), PolicyConfig::default());
    let sweeper = ExpirySweeper::new(
        service.clone(),
        clock.clone(),
        Duration::hours(GRACE_HOURS),
        StdDuration::from_secs(3600),
    );

    let poisoned = schedule(&service, "2026-03-02", "09:00").await;
    let healthy = schedule(&service, "2026-03-02", "10:00").await;
    flaky.poison(poisoned.appointment_id);

    clock.set(Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap());

    let report = sweeper.tick().await;
    assert_eq!(report.examined, 2);
    assert_eq!(report.transitioned, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(
        status_of(&service, healthy.appointment_id).await,
        AppointmentState::NoShow
    );
    assert_eq!(
        status_of(&service, poisoned.appointment_id).await,
        AppointmentState::Scheduled
    );

    // still eligible on the next pass
    let retry = sweeper.tick().await;
    assert_eq!(retry.examined, 1);
    assert_eq!(retry.failed, 1);
}
