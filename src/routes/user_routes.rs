// src/routes/user_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, OkData, OkResponse},
};

fn ensure_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == 1 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin can manage users".into(),
        ))
    }
}

// An admin disabling their own account would lock them out on the spot.
fn ensure_not_self(auth: &AuthContext, target: Uuid) -> Result<(), ApiError> {
    if auth.user_id == target {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "You cannot disable your own account".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserPublicRow {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub role: i16,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct UsersListResponse {
    pub data: UsersListData,
}

#[derive(Debug, Serialize)]
pub struct UsersListData {
    pub users: Vec<UserPublicRow>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        // /api/v1/users
        .route("/", get(list_users))
        // /api/v1/users/{user_id}/disable
        .route("/{user_id}/disable", post(disable_user))
        // /api/v1/users/{user_id}/enable
        .route("/{user_id}/enable", post(enable_user))
}

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<UsersListResponse>, ApiError> {
    ensure_admin(&auth)?;

    let users: Vec<UserPublicRow> = sqlx::query_as::<_, UserPublicRow>(
        r#"
        SELECT user_id, email, display_name, phone, role, is_active, created_at
        FROM app_user
        ORDER BY created_at DESC
        LIMIT 200
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(UsersListResponse {
        data: UsersListData { users },
    }))
}

/// Disabled accounts keep their rows and history; the auth middleware stops
/// accepting their sessions immediately.
pub async fn disable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_admin(&auth)?;
    ensure_not_self(&auth, user_id)?;

    let res = sqlx::query(
        r#"
        UPDATE app_user
        SET is_active = false
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "user not found".into()));
    }

    tracing::info!(%user_id, "user account disabled");

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

pub async fn enable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_admin(&auth)?;

    let res = sqlx::query(
        r#"
        UPDATE app_user
        SET is_active = true
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "user not found".into()));
    }

    tracing::info!(%user_id, "user account enabled");

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
