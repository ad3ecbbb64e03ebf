use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::error::AppointmentError;
use crate::models::{
    Appointment, AppointmentFilter, AppointmentPatch, AppointmentState, NewAppointment,
    SummaryCounts,
};

pub mod memory;
pub mod postgres;

/// Persistence seam for appointments. Both implementations uphold the same
/// invariant: at most one non-cancelled row per (slot_date, slot_time),
/// decided inside the write itself, never by a separate read.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Insert a new appointment. `SlotConflict` when an active row already
    /// occupies the slot.
    async fn create(&self, new: NewAppointment) -> Result<Appointment, AppointmentError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Active (non-cancelled) occupant of a slot, optionally ignoring one id.
    async fn find_active_by_slot(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        exclude: Option<Uuid>,
    ) -> Result<Option<Appointment>, AppointmentError>;

    /// Apply a field patch and refresh `updated_at`, but only while the row's
    /// state is still one of `expected`; the gate sits inside the write, like
    /// `transition`. `Ok(None)` means the row is missing or was concurrently
    /// moved; the caller re-reads to classify. Slot moves that collide with
    /// an active row surface as `SlotConflict`.
    async fn update_fields(
        &self,
        id: Uuid,
        patch: AppointmentPatch,
        expected: &[AppointmentState],
    ) -> Result<Option<Appointment>, AppointmentError>;

    /// Compare-and-set on `status`: the row moves to `to` only if its current
    /// state is still one of `expected`. `Ok(None)` means the row is missing
    /// or was concurrently moved; the caller re-reads to classify. `note` is
    /// appended to `notes` (capped at 500 chars).
    async fn transition(
        &self,
        id: Uuid,
        expected: &[AppointmentState],
        to: AppointmentState,
        note: Option<&str>,
    ) -> Result<Option<Appointment>, AppointmentError>;

    /// Requested or scheduled rows for a patient with a slot on `from` or
    /// later; feeds the booking quota.
    async fn count_active_for_patient(
        &self,
        patient_id: Uuid,
        from: NaiveDate,
    ) -> Result<i64, AppointmentError>;

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError>;

    /// Requested rows, newest first; the authorization queue.
    async fn list_requested(&self) -> Result<Vec<Appointment>, AppointmentError>;

    /// Scheduled rows with `slot_date <= as_of`. A coarse date-level cut;
    /// the sweeper applies the precise grace threshold.
    async fn list_overdue_scheduled(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    async fn summary_counts(&self, today: NaiveDate) -> Result<SummaryCounts, AppointmentError>;

    /// Physical removal, outside the state machine. Returns whether a row
    /// was deleted.
    async fn hard_delete(&self, id: Uuid) -> Result<bool, AppointmentError>;
}
