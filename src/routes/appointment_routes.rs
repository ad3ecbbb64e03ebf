// src/routes/appointment_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    lifecycle::{AppointmentChanges, AppointmentDraft},
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, Appointment, AppointmentDto, AppointmentFilter, AppointmentState,
        OkData, OkResponse, SummaryCounts,
    },
    policy::Caller,
};

/*
Roles (app_user.role):
0 patient
1 admin
*/

fn caller_of(auth: &AuthContext) -> Caller {
    if auth.role == 1 {
        Caller::Admin(auth.user_id)
    } else {
        Caller::Patient(auth.user_id)
    }
}

const MAX_LIST_LIMIT: i64 = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(create_appointment))
        .route("/appointments", get(list_appointments))
        .route("/appointments/pending", get(list_pending))
        .route("/appointments/summary", get(summary))
        .route("/appointments/{appointment_id}", get(get_appointment))
        .route("/appointments/{appointment_id}", put(update_appointment))
        .route("/appointments/{appointment_id}", delete(delete_appointment))
        .route("/appointments/{appointment_id}/authorize", post(authorize_appointment))
        .route("/appointments/{appointment_id}/complete", post(complete_appointment))
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
}

fn present(state: &AppState, a: Appointment) -> AppointmentDto {
    let (can_cancel, can_modify) = state.appointments.display_flags(&a);
    AppointmentDto::from_appointment(a, can_cancel, can_modify)
}

/* ============================================================
   POST /appointments (create)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    /// Admin-only: book on behalf of this patient.
    pub patient_id: Option<Uuid>,
    pub slot_date: String,
    pub slot_time: String,
    pub reason: String,
    pub extra_description: Option<String>,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let caller = caller_of(&auth);
    let appt = state
        .appointments
        .request(
            &caller,
            req.patient_id,
            AppointmentDraft {
                slot_date: req.slot_date,
                slot_time: req.slot_time,
                reason: req.reason,
                extra_description: req.extra_description,
            },
        )
        .await?;

    Ok(Json(ApiOk {
        data: present(&state, appt),
    }))
}

/* ============================================================
   GET /appointments
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub date: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let mut filter = AppointmentFilter::default();
    if let Some(raw) = q.status.as_deref() {
        let status = AppointmentState::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(
                "VALIDATION_ERROR",
                "status must be one of requested, scheduled, completed, cancelled, no_show"
                    .into(),
            )
        })?;
        filter.status = Some(status);
    }
    if let Some(raw) = q.date.as_deref() {
        let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
            ApiError::BadRequest("VALIDATION_ERROR", "date must be YYYY-MM-DD".into())
        })?;
        filter.date = Some(date);
    }
    if let Some(limit) = q.limit {
        filter.limit = Some(limit.clamp(1, MAX_LIST_LIMIT));
    }

    let caller = caller_of(&auth);
    let rows = state.appointments.list(&caller, filter).await?;

    Ok(Json(ApiOk {
        data: rows.into_iter().map(|a| present(&state, a)).collect(),
    }))
}

/* ============================================================
   GET /appointments/pending  (admin approval queue)
   ============================================================ */

pub async fn list_pending(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let caller = caller_of(&auth);
    let rows = state.appointments.list_pending(&caller).await?;

    Ok(Json(ApiOk {
        data: rows.into_iter().map(|a| present(&state, a)).collect(),
    }))
}

/* ============================================================
   GET /appointments/summary  (admin dashboard counts)
   ============================================================ */

pub async fn summary(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<SummaryCounts>>, ApiError> {
    let caller = caller_of(&auth);
    let counts = state.appointments.summary(&caller).await?;
    Ok(Json(ApiOk { data: counts }))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let caller = caller_of(&auth);
    let appt = state.appointments.get(&caller, appointment_id).await?;

    Ok(Json(ApiOk {
        data: present(&state, appt),
    }))
}

/* ============================================================
   PUT /appointments/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub slot_date: Option<String>,
    pub slot_time: Option<String>,
    pub reason: Option<String>,
    pub extra_description: Option<String>,
}

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let caller = caller_of(&auth);
    let appt = state
        .appointments
        .update(
            &caller,
            appointment_id,
            AppointmentChanges {
                slot_date: req.slot_date,
                slot_time: req.slot_time,
                reason: req.reason,
                extra_description: req.extra_description,
            },
        )
        .await?;

    Ok(Json(ApiOk {
        data: present(&state, appt),
    }))
}

/* ============================================================
   DELETE /appointments/{id}  (admin hard delete)
   ============================================================ */

pub async fn delete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    let caller = caller_of(&auth);
    state.appointments.hard_delete(&caller, appointment_id).await?;

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

/* ============================================================
   Status transitions
   ============================================================ */

pub async fn authorize_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let caller = caller_of(&auth);
    let appt = state.appointments.authorize(&caller, appointment_id).await?;

    Ok(Json(ApiOk {
        data: present(&state, appt),
    }))
}

pub async fn complete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let caller = caller_of(&auth);
    let appt = state.appointments.complete(&caller, appointment_id).await?;

    Ok(Json(ApiOk {
        data: present(&state, appt),
    }))
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let caller = caller_of(&auth);
    let appt = state.appointments.cancel(&caller, appointment_id).await?;

    Ok(Json(ApiOk {
        data: present(&state, appt),
    }))
}
