use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppointmentError;
use crate::models::{
    Appointment, AppointmentFilter, AppointmentPatch, AppointmentState, NewAppointment,
    SummaryCounts,
};
use crate::store::AppointmentStore;

/// Status discriminants used in raw SQL below:
/// 0 requested, 1 scheduled, 2 completed, 3 cancelled, 4 no_show.
///
/// The slot invariant lives in the schema: `appointment_active_slot_idx`
/// is a partial unique index on (slot_date, slot_time) WHERE status <> 3,
/// so the database arbitrates concurrent bookings.
pub struct PgAppointmentStore {
    db: PgPool,
}

impl PgAppointmentStore {
    pub fn new(db: PgPool) -> Self {
        PgAppointmentStore { db }
    }
}

const ACTIVE_SLOT_IDX: &str = "appointment_active_slot_idx";

fn map_db_err(e: sqlx::Error) -> AppointmentError {
    if let sqlx::Error::Database(db) = &e {
        if db.constraint() == Some(ACTIVE_SLOT_IDX) {
            return AppointmentError::SlotConflict;
        }
    }
    AppointmentError::Store(e.to_string())
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn create(&self, new: NewAppointment) -> Result<Appointment, AppointmentError> {
        sqlx::query_as::<_, Appointment>(
            r#"
            INSERT INTO appointment
                (patient_id, slot_date, slot_time, reason, extra_description, status)
            VALUES
                ($1, $2, $3, $4, $5, $6)
            RETURNING appointment_id, patient_id, slot_date, slot_time, reason,
                      extra_description, status, notes, created_at, updated_at
            "#,
        )
        .bind(new.patient_id)
        .bind(new.slot_date)
        .bind(new.slot_time)
        .bind(&new.reason)
        .bind(new.extra_description.as_deref())
        .bind(new.status)
        .fetch_one(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        sqlx::query_as::<_, Appointment>(
            r#"
            SELECT appointment_id, patient_id, slot_date, slot_time, reason,
                   extra_description, status, notes, created_at, updated_at
            FROM appointment
            WHERE appointment_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn find_active_by_slot(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        exclude: Option<Uuid>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        sqlx::query_as::<_, Appointment>(
            r#"
            SELECT appointment_id, patient_id, slot_date, slot_time, reason,
                   extra_description, status, notes, created_at, updated_at
            FROM appointment
            WHERE slot_date = $1
              AND slot_time = $2
              AND status <> 3
              AND ($3::uuid IS NULL OR appointment_id <> $3)
            "#,
        )
        .bind(date)
        .bind(time)
        .bind(exclude)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn update_fields(
        &self,
        id: Uuid,
        patch: AppointmentPatch,
        expected: &[AppointmentState],
    ) -> Result<Option<Appointment>, AppointmentError> {
        let expected: Vec<i16> = expected.iter().map(|s| *s as i16).collect();

        // The state gate sits inside the UPDATE itself, so a concurrent
        // transition cannot slip between a read and this write.
        sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointment
            SET slot_date         = COALESCE($2, slot_date),
                slot_time         = COALESCE($3, slot_time),
                reason            = COALESCE($4, reason),
                extra_description = COALESCE($5, extra_description),
                updated_at        = now()
            WHERE appointment_id = $1
              AND status = ANY($6)
            RETURNING appointment_id, patient_id, slot_date, slot_time, reason,
                      extra_description, status, notes, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(patch.slot_date)
        .bind(patch.slot_time)
        .bind(patch.reason.as_deref())
        .bind(patch.extra_description.as_deref())
        .bind(&expected)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: &[AppointmentState],
        to: AppointmentState,
        note: Option<&str>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let expected: Vec<i16> = expected.iter().map(|s| *s as i16).collect();

        // The state precondition sits inside the UPDATE itself, so there is
        // no read-then-write window.
        sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointment
            SET status = $2,
                notes = CASE
                    WHEN $3::text IS NULL THEN notes
                    ELSE left(concat_ws(E'\n', notes, $3::text), 500)
                END,
                updated_at = now()
            WHERE appointment_id = $1
              AND status = ANY($4)
            RETURNING appointment_id, patient_id, slot_date, slot_time, reason,
                      extra_description, status, notes, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(note)
        .bind(&expected)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn count_active_for_patient(
        &self,
        patient_id: Uuid,
        from: NaiveDate,
    ) -> Result<i64, AppointmentError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count(*)
            FROM appointment
            WHERE patient_id = $1
              AND status IN (0, 1)
              AND slot_date >= $2
            "#,
        )
        .bind(patient_id)
        .bind(from)
        .fetch_one(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        let mut sql = String::from(
            "SELECT appointment_id, patient_id, slot_date, slot_time, reason, \
             extra_description, status, notes, created_at, updated_at \
             FROM appointment",
        );

        let mut conditions: Vec<String> = Vec::new();
        let mut idx = 0;
        if filter.patient_id.is_some() {
            idx += 1;
            conditions.push(format!("patient_id = ${idx}"));
        }
        if filter.status.is_some() {
            idx += 1;
            conditions.push(format!("status = ${idx}"));
        }
        if filter.date.is_some() {
            idx += 1;
            conditions.push(format!("slot_date = ${idx}"));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        idx += 1;
        sql.push_str(&format!(" ORDER BY slot_date ASC, slot_time ASC LIMIT ${idx}"));

        let mut query = sqlx::query_as::<_, Appointment>(&sql);
        if let Some(p) = filter.patient_id {
            query = query.bind(p);
        }
        if let Some(s) = filter.status {
            query = query.bind(s);
        }
        if let Some(d) = filter.date {
            query = query.bind(d);
        }
        query = query.bind(filter.limit.unwrap_or(50));

        query.fetch_all(&self.db).await.map_err(map_db_err)
    }

    async fn list_requested(&self) -> Result<Vec<Appointment>, AppointmentError> {
        sqlx::query_as::<_, Appointment>(
            r#"
            SELECT appointment_id, patient_id, slot_date, slot_time, reason,
                   extra_description, status, notes, created_at, updated_at
            FROM appointment
            WHERE status = 0
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn list_overdue_scheduled(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        sqlx::query_as::<_, Appointment>(
            r#"
            SELECT appointment_id, patient_id, slot_date, slot_time, reason,
                   extra_description, status, notes, created_at, updated_at
            FROM appointment
            WHERE status = 1
              AND slot_date <= $1
            ORDER BY slot_date ASC, slot_time ASC
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn summary_counts(&self, today: NaiveDate) -> Result<SummaryCounts, AppointmentError> {
        sqlx::query_as::<_, SummaryCounts>(
            r#"
            SELECT
                count(*)                                                  AS total,
                count(*) FILTER (WHERE status = 0)                        AS requested,
                count(*) FILTER (WHERE status = 1 AND slot_date >= $1)    AS scheduled,
                count(*) FILTER (WHERE status = 2)                        AS completed,
                count(*) FILTER (WHERE status = 3)                        AS cancelled,
                count(*) FILTER (WHERE status = 4)                        AS no_show,
                count(*) FILTER (WHERE slot_date = $1)                    AS today
            FROM appointment
            "#,
        )
        .bind(today)
        .fetch_one(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn hard_delete(&self, id: Uuid) -> Result<bool, AppointmentError> {
        let res = sqlx::query("DELETE FROM appointment WHERE appointment_id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(map_db_err)?;
        Ok(res.rows_affected() > 0)
    }
}
