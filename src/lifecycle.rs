use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AppointmentError;
use crate::models::{
    Appointment, AppointmentFilter, AppointmentPatch, AppointmentState, NewAppointment,
    SummaryCounts,
};
use crate::policy::{self, Caller, PolicyConfig};
use crate::store::AppointmentStore;

/// Raw booking fields as they arrive over the wire. Parsing and validation
/// happen here so the store only ever sees well-formed values.
#[derive(Debug, Clone)]
pub struct AppointmentDraft {
    pub slot_date: String,
    pub slot_time: String,
    pub reason: String,
    pub extra_description: Option<String>,
}

/// Partial edit; absent fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct AppointmentChanges {
    pub slot_date: Option<String>,
    pub slot_time: Option<String>,
    pub reason: Option<String>,
    pub extra_description: Option<String>,
}

/// Orchestrates every appointment operation: policy gate first, then a
/// single store mutation. State changes go through compare-and-set, so two
/// racing callers cannot both move the same row.
#[derive(Clone)]
pub struct AppointmentService {
    store: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
    policy: PolicyConfig,
}

impl AppointmentService {
    pub fn new(store: Arc<dyn AppointmentStore>, clock: Arc<dyn Clock>, policy: PolicyConfig) -> Self {
        AppointmentService { store, clock, policy }
    }

    /// Book a slot. Patients book for themselves and start in `requested`;
    /// administrators may book on behalf of any patient and the row starts
    /// in `scheduled` directly.
    pub async fn request(
        &self,
        caller: &Caller,
        for_patient: Option<Uuid>,
        draft: AppointmentDraft,
    ) -> Result<Appointment, AppointmentError> {
        let Some(caller_id) = caller.user_id() else {
            return Err(AppointmentError::Forbidden(
                "booking requires a signed-in user".into(),
            ));
        };
        let patient_id = match for_patient {
            Some(id) if id != caller_id => {
                if !caller.is_admin() {
                    return Err(AppointmentError::Forbidden(
                        "patients can only book for themselves".into(),
                    ));
                }
                id
            }
            Some(id) => id,
            None => caller_id,
        };

        let now = self.clock.now();
        let today = now.date_naive();

        let slot_date = policy::parse_slot_date(&draft.slot_date)?;
        policy::validate_slot_date(slot_date, today)?;
        let slot_time = policy::parse_slot_time(&draft.slot_time)?;
        let reason = policy::validate_reason(&draft.reason)?;
        let extra_description =
            policy::validate_extra_description(draft.extra_description.as_deref())?;

        if !caller.is_admin() {
            let active = self
                .store
                .count_active_for_patient(patient_id, today)
                .await?;
            policy::check_quota(active, self.policy.max_active_per_patient)?;
        }

        let status = if caller.is_admin() {
            AppointmentState::Scheduled
        } else {
            AppointmentState::Requested
        };

        self.store
            .create(NewAppointment {
                patient_id,
                slot_date,
                slot_time,
                reason,
                extra_description,
                status,
            })
            .await
    }

    pub async fn get(&self, caller: &Caller, id: Uuid) -> Result<Appointment, AppointmentError> {
        let appt = self.fetch(id).await?;
        policy::can_view(caller, &appt)?;
        Ok(appt)
    }

    /// Patients are always scoped to their own rows; admins see everything
    /// the filter matches.
    pub async fn list(
        &self,
        caller: &Caller,
        mut filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        match caller {
            Caller::Admin(_) => {}
            Caller::Patient(id) => filter.patient_id = Some(*id),
            Caller::System => {
                return Err(AppointmentError::Forbidden(
                    "listing requires a signed-in user".into(),
                ));
            }
        }
        self.store.list(filter).await
    }

    /// Approval queue: every `requested` row, newest first.
    pub async fn list_pending(&self, caller: &Caller) -> Result<Vec<Appointment>, AppointmentError> {
        policy::ensure_admin(caller)?;
        self.store.list_requested().await
    }

    pub async fn summary(&self, caller: &Caller) -> Result<SummaryCounts, AppointmentError> {
        policy::ensure_admin(caller)?;
        self.store.summary_counts(self.clock.now().date_naive()).await
    }

    /// `requested -> scheduled`. The slot is re-checked for a foreign
    /// occupant right before the move; the unique index enforces the same
    /// rule at write time.
    pub async fn authorize(
        &self,
        caller: &Caller,
        id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        let appt = self.fetch(id).await?;
        policy::can_transition(
            caller,
            &appt,
            AppointmentState::Scheduled,
            self.clock.now(),
            &self.policy,
        )?;

        if self
            .store
            .find_active_by_slot(appt.slot_date, appt.slot_time, Some(id))
            .await?
            .is_some()
        {
            return Err(AppointmentError::SlotConflict);
        }

        match self
            .store
            .transition(
                id,
                &[AppointmentState::Requested],
                AppointmentState::Scheduled,
                None,
            )
            .await?
        {
            Some(row) => Ok(row),
            None => self.cas_lost(id, AppointmentState::Scheduled).await,
        }
    }

    pub async fn cancel(&self, caller: &Caller, id: Uuid) -> Result<Appointment, AppointmentError> {
        let appt = self.fetch(id).await?;
        policy::can_transition(
            caller,
            &appt,
            AppointmentState::Cancelled,
            self.clock.now(),
            &self.policy,
        )?;

        match self
            .store
            .transition(
                id,
                &[AppointmentState::Requested, AppointmentState::Scheduled],
                AppointmentState::Cancelled,
                None,
            )
            .await?
        {
            Some(row) => Ok(row),
            None => self.cas_lost(id, AppointmentState::Cancelled).await,
        }
    }

    pub async fn complete(
        &self,
        caller: &Caller,
        id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        let appt = self.fetch(id).await?;
        policy::can_transition(
            caller,
            &appt,
            AppointmentState::Completed,
            self.clock.now(),
            &self.policy,
        )?;

        match self
            .store
            .transition(
                id,
                &[AppointmentState::Scheduled],
                AppointmentState::Completed,
                None,
            )
            .await?
        {
            Some(row) => Ok(row),
            None => self.cas_lost(id, AppointmentState::Completed).await,
        }
    }

    /// Edit slot, reason or description on an open appointment. Moving to
    /// an occupied slot is refused here and backstopped by the unique index;
    /// the open-state gate rides inside the write itself.
    pub async fn update(
        &self,
        caller: &Caller,
        id: Uuid,
        changes: AppointmentChanges,
    ) -> Result<Appointment, AppointmentError> {
        let appt = self.fetch(id).await?;
        policy::can_update(caller, &appt)?;

        let today = self.clock.now().date_naive();
        let mut patch = AppointmentPatch::default();
        if let Some(raw) = &changes.slot_date {
            let date = policy::parse_slot_date(raw)?;
            policy::validate_slot_date(date, today)?;
            patch.slot_date = Some(date);
        }
        if let Some(raw) = &changes.slot_time {
            patch.slot_time = Some(policy::parse_slot_time(raw)?);
        }
        if let Some(raw) = &changes.reason {
            patch.reason = Some(policy::validate_reason(raw)?);
        }
        if let Some(raw) = &changes.extra_description {
            patch.extra_description = policy::validate_extra_description(Some(raw))?;
        }

        let target_date = patch.slot_date.unwrap_or(appt.slot_date);
        let target_time = patch.slot_time.unwrap_or(appt.slot_time);
        if (target_date, target_time) != (appt.slot_date, appt.slot_time)
            && self
                .store
                .find_active_by_slot(target_date, target_time, Some(id))
                .await?
                .is_some()
        {
            return Err(AppointmentError::SlotConflict);
        }

        let updated = self
            .store
            .update_fields(
                id,
                patch,
                &[AppointmentState::Requested, AppointmentState::Scheduled],
            )
            .await?;
        match updated {
            Some(row) => Ok(row),
            // The row left the open states between our check and the write;
            // refuse exactly as a fresh attempt against it would.
            None => match self.store.find_by_id(id).await? {
                None => Err(AppointmentError::NotFound),
                Some(row) => Err(policy::update_conflict(row.status)),
            },
        }
    }

    /// Destructive admin-only removal that bypasses the state machine.
    pub async fn hard_delete(&self, caller: &Caller, id: Uuid) -> Result<(), AppointmentError> {
        policy::ensure_admin(caller)?;
        if !self.store.hard_delete(id).await? {
            return Err(AppointmentError::NotFound);
        }
        tracing::warn!(appointment_id = %id, "appointment permanently deleted");
        Ok(())
    }

    /// Sweeper path. `Ok(None)` means the row moved out of `scheduled`
    /// before we got to it, which the sweeper counts as skipped.
    pub async fn mark_no_show(
        &self,
        id: Uuid,
        note: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        self.store
            .transition(
                id,
                &[AppointmentState::Scheduled],
                AppointmentState::NoShow,
                Some(note),
            )
            .await
    }

    pub async fn overdue_scheduled(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.store.list_overdue_scheduled(as_of).await
    }

    /// `(can_cancel, can_modify)` for presentation, evaluated at the
    /// service clock's now.
    pub fn display_flags(&self, appt: &Appointment) -> (bool, bool) {
        policy::display_flags(appt, self.clock.now(), &self.policy)
    }

    async fn fetch(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    /// A compare-and-set came back empty: either the row vanished or another
    /// writer moved it first. Re-read and report what the caller actually
    /// raced against.
    async fn cas_lost(
        &self,
        id: Uuid,
        target: AppointmentState,
    ) -> Result<Appointment, AppointmentError> {
        match self.store.find_by_id(id).await? {
            None => Err(AppointmentError::NotFound),
            Some(row) => Err(policy::transition_conflict(row.status, target)),
        }
    }
}
