use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::lifecycle::AppointmentService;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub appointments: AppointmentService,
    pub session_ttl_hours: i64,
}

/* -------------------------
   Appointment domain
--------------------------*/

/// Stored as smallint; keep the discriminants stable, the partial unique
/// index and the CAS updates reference them by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum AppointmentState {
    Requested = 0,
    Scheduled = 1,
    Completed = 2,
    Cancelled = 3,
    NoShow = 4,
}

impl AppointmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentState::Requested => "requested",
            AppointmentState::Scheduled => "scheduled",
            AppointmentState::Completed => "completed",
            AppointmentState::Cancelled => "cancelled",
            AppointmentState::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(AppointmentState::Requested),
            "scheduled" => Some(AppointmentState::Scheduled),
            "completed" => Some(AppointmentState::Completed),
            "cancelled" => Some(AppointmentState::Cancelled),
            "no_show" => Some(AppointmentState::NoShow),
            _ => None,
        }
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentState::Completed | AppointmentState::Cancelled | AppointmentState::NoShow
        )
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub slot_date: NaiveDate,
    pub slot_time: NaiveTime,
    pub reason: String,
    pub extra_description: Option<String>,
    pub status: AppointmentState,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// The slot on the UTC timeline. Grace and cutoff arithmetic all runs
    /// against this instant.
    pub fn slot_instant(&self) -> DateTime<Utc> {
        self.slot_date.and_time(self.slot_time).and_utc()
    }
}

/* -------------------------
   Store parameter types
--------------------------*/

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub slot_date: NaiveDate,
    pub slot_time: NaiveTime,
    pub reason: String,
    pub extra_description: Option<String>,
    pub status: AppointmentState,
}

/// Field-level patch; `None` keeps the stored value (COALESCE semantics).
#[derive(Debug, Clone, Default)]
pub struct AppointmentPatch {
    pub slot_date: Option<NaiveDate>,
    pub slot_time: Option<NaiveTime>,
    pub reason: Option<String>,
    pub extra_description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentState>,
    pub date: Option<NaiveDate>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct SummaryCounts {
    pub total: i64,
    pub requested: i64,
    /// Scheduled with a slot today or later; past scheduled rows belong to
    /// the sweeper, not the dashboard.
    pub scheduled: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub no_show: i64,
    /// Every row dated today, whatever its state.
    pub today: i64,
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct AppointmentDto {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub slot_date: NaiveDate,
    /// HH:MM, zero-padded.
    pub slot_time: String,
    pub reason: String,
    pub extra_description: Option<String>,
    pub status: AppointmentState,
    pub notes: Option<String>,
    pub can_cancel: bool,
    pub can_modify: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentDto {
    pub fn from_appointment(a: Appointment, can_cancel: bool, can_modify: bool) -> Self {
        AppointmentDto {
            appointment_id: a.appointment_id,
            patient_id: a.patient_id,
            slot_date: a.slot_date,
            slot_time: a.slot_time.format("%H:%M").to_string(),
            reason: a.reason,
            extra_description: a.extra_description,
            status: a.status,
            notes: a.notes,
            can_cancel,
            can_modify,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub user: UserProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   Helpers
--------------------------*/

/// Role mapping (app_user.role): 0 patient, 1 admin.
pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "patient",
        1 => "admin",
        _ => "unknown",
    }
    .to_string()
}

impl UserProfile {
    pub fn from_row(u: &UserRow) -> Self {
        UserProfile {
            user_id: u.user_id,
            email: u.email.clone(),
            display_name: u.display_name.clone(),
            phone: u.phone.clone(),
            role: role_to_string(u.role),
        }
    }
}
