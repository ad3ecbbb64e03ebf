use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::AppointmentError;
use crate::models::{
    Appointment, AppointmentFilter, AppointmentPatch, AppointmentState, NewAppointment,
    SummaryCounts,
};
use crate::store::AppointmentStore;

const NOTES_MAX_CHARS: usize = 500;

/// In-memory store with the same semantics as the Postgres one. The slot
/// check and the insert happen under a single lock, which is what the
/// partial unique index gives the production store.
pub struct MemoryAppointmentStore {
    rows: Mutex<HashMap<Uuid, Appointment>>,
    clock: Arc<dyn Clock>,
}

impl MemoryAppointmentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Timestamps (`created_at`, `updated_at`) come from this clock, so
    /// tests driving a manual clock see consistent values.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        MemoryAppointmentStore {
            rows: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryAppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_taken(rows: &HashMap<Uuid, Appointment>, date: NaiveDate, time: NaiveTime, exclude: Option<Uuid>) -> bool {
    rows.values().any(|a| {
        a.slot_date == date
            && a.slot_time == time
            && a.status != AppointmentState::Cancelled
            && Some(a.appointment_id) != exclude
    })
}

fn append_note(notes: &mut Option<String>, note: &str) {
    let combined = match notes.take() {
        Some(existing) => format!("{existing}\n{note}"),
        None => note.to_string(),
    };
    *notes = Some(combined.chars().take(NOTES_MAX_CHARS).collect());
}

#[async_trait]
impl AppointmentStore for MemoryAppointmentStore {
    async fn create(&self, new: NewAppointment) -> Result<Appointment, AppointmentError> {
        let mut rows = self.rows.lock().unwrap();
        if slot_taken(&rows, new.slot_date, new.slot_time, None) {
            return Err(AppointmentError::SlotConflict);
        }
        let now = self.clock.now();
        let appt = Appointment {
            appointment_id: Uuid::new_v4(),
            patient_id: new.patient_id,
            slot_date: new.slot_date,
            slot_time: new.slot_time,
            reason: new.reason,
            extra_description: new.extra_description,
            status: new.status,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        rows.insert(appt.appointment_id, appt.clone());
        Ok(appt)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn find_active_by_slot(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        exclude: Option<Uuid>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|a| {
                a.slot_date == date
                    && a.slot_time == time
                    && a.status != AppointmentState::Cancelled
                    && Some(a.appointment_id) != exclude
            })
            .cloned())
    }

    async fn update_fields(
        &self,
        id: Uuid,
        patch: AppointmentPatch,
        expected: &[AppointmentState],
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut rows = self.rows.lock().unwrap();

        let Some(current) = rows.get(&id).cloned() else {
            return Ok(None);
        };
        // State gate and patch happen under the same lock, like `transition`.
        if !expected.contains(&current.status) {
            return Ok(None);
        }
        let date = patch.slot_date.unwrap_or(current.slot_date);
        let time = patch.slot_time.unwrap_or(current.slot_time);

        // Same arbitration as the unique index: re-check under the lock.
        if current.status != AppointmentState::Cancelled
            && slot_taken(&rows, date, time, Some(id))
        {
            return Err(AppointmentError::SlotConflict);
        }

        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        row.slot_date = date;
        row.slot_time = time;
        if let Some(reason) = patch.reason {
            row.reason = reason;
        }
        if let Some(desc) = patch.extra_description {
            row.extra_description = Some(desc);
        }
        row.updated_at = self.clock.now();
        Ok(Some(row.clone()))
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: &[AppointmentState],
        to: AppointmentState,
        note: Option<&str>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&row.status) {
            return Ok(None);
        }
        row.status = to;
        if let Some(note) = note {
            append_note(&mut row.notes, note);
        }
        row.updated_at = self.clock.now();
        Ok(Some(row.clone()))
    }

    async fn count_active_for_patient(
        &self,
        patient_id: Uuid,
        from: NaiveDate,
    ) -> Result<i64, AppointmentError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|a| {
                a.patient_id == patient_id
                    && matches!(
                        a.status,
                        AppointmentState::Requested | AppointmentState::Scheduled
                    )
                    && a.slot_date >= from
            })
            .count() as i64)
    }

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<Appointment> = rows
            .values()
            .filter(|a| filter.patient_id.is_none_or(|p| a.patient_id == p))
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| filter.date.is_none_or(|d| a.slot_date == d))
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.slot_date, a.slot_time));
        out.truncate(filter.limit.unwrap_or(50).max(0) as usize);
        Ok(out)
    }

    async fn list_requested(&self) -> Result<Vec<Appointment>, AppointmentError> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<Appointment> = rows
            .values()
            .filter(|a| a.status == AppointmentState::Requested)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_overdue_scheduled(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<Appointment> = rows
            .values()
            .filter(|a| a.status == AppointmentState::Scheduled && a.slot_date <= as_of)
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.slot_date, a.slot_time));
        Ok(out)
    }

    async fn summary_counts(&self, today: NaiveDate) -> Result<SummaryCounts, AppointmentError> {
        let rows = self.rows.lock().unwrap();
        let mut counts = SummaryCounts {
            total: 0,
            requested: 0,
            scheduled: 0,
            completed: 0,
            cancelled: 0,
            no_show: 0,
            today: 0,
        };
        for a in rows.values() {
            counts.total += 1;
            match a.status {
                AppointmentState::Requested => counts.requested += 1,
                AppointmentState::Scheduled => {
                    if a.slot_date >= today {
                        counts.scheduled += 1;
                    }
                }
                AppointmentState::Completed => counts.completed += 1,
                AppointmentState::Cancelled => counts.cancelled += 1,
                AppointmentState::NoShow => counts.no_show += 1,
            }
            if a.slot_date == today {
                counts.today += 1;
            }
        }
        Ok(counts)
    }

    async fn hard_delete(&self, id: Uuid) -> Result<bool, AppointmentError> {
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }
}
