//! Account service routes

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use common::pagination::PageRequest;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{
    AppState,
    error::{AccountError, ApiError, ApiResult},
    middleware::admin_guard,
    models::{AdminUserDto, KeyAndPassword, ManagedUserVm, UserDto, UserWithAuthorities},
    validation::is_password_length_invalid,
};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl PageQuery {
    fn request(&self) -> PageRequest {
        PageRequest::from_query(self.page, self.size)
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivationQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetInit {
    pub email: String,
}

/// Create the router for the account service
///
/// The admin routes sit behind [`admin_guard`]; when no admin token is
/// configured they are open and must only be reachable through a gateway.
pub fn create_router(state: AppState) -> Router {
    let account_routes = Router::new()
        .route("/register", post(register_account))
        .route("/activate", get(activate_account))
        .route("/account/reset-password/init", post(request_password_reset))
        .route("/account/reset-password/finish", post(finish_password_reset));

    let admin_routes = Router::new()
        .route(
            "/admin/users",
            get(get_managed_users).post(create_user).put(update_user),
        )
        .route("/admin/users/:login", get(get_user).delete(delete_user))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_guard));

    let lookup_routes = Router::new()
        .route("/users", get(get_public_users))
        .route("/authorities", get(get_authorities))
        .route("/authorities/:name", get(get_authority))
        .route("/operations", get(get_operations))
        .route("/operations/:id", get(get_operation));

    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api",
            account_routes.merge(admin_routes).merge(lookup_routes),
        )
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "account-service"
    }))
}

/// Register a new user; the activation mail is sent in the background
pub async fn register_account(
    State(state): State<AppState>,
    Json(payload): Json<ManagedUserVm>,
) -> ApiResult<impl IntoResponse> {
    if is_password_length_invalid(&payload.password) {
        return Err(AccountError::InvalidPassword.into());
    }

    let user = state
        .account_service
        .register_user(&payload.user, &payload.password)
        .await?;

    let mail_service = state.mail_service.clone();
    let registered = user.clone();
    tokio::spawn(async move {
        mail_service.send_activation_email(&registered).await;
    });

    Ok((StatusCode::CREATED, Json(UserDto::from(&user))))
}

/// Activate the account holding the given key
pub async fn activate_account(
    State(state): State<AppState>,
    Query(query): Query<ActivationQuery>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .account_service
        .activate_registration(&query.key)
        .await?
        .ok_or_else(|| ApiError::NotFound("No user was found for this activation key".to_string()))?;

    Ok(Json(UserDto::from(&user)))
}

/// Start a password reset. Always answers 200 so callers cannot tell which emails are registered.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetInit>,
) -> ApiResult<impl IntoResponse> {
    match state
        .account_service
        .request_password_reset(&payload.email)
        .await?
    {
        Some(user) => {
            let mail_service = state.mail_service.clone();
            tokio::spawn(async move {
                mail_service.send_password_reset_mail(&user).await;
            });
        }
        None => warn!("Password reset requested for non existing mail"),
    }

    Ok(StatusCode::OK)
}

pub async fn finish_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<KeyAndPassword>,
) -> ApiResult<impl IntoResponse> {
    if is_password_length_invalid(&payload.new_password) {
        return Err(AccountError::InvalidPassword.into());
    }

    state
        .account_service
        .complete_password_reset(&payload.new_password, &payload.key)
        .await?
        .ok_or_else(|| ApiError::NotFound("No user was found for this reset key".to_string()))?;

    Ok(StatusCode::OK)
}

pub async fn get_managed_users(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .account_service
        .get_all_managed_users(&query.request())
        .await?;
    Ok(Json(page))
}

/// Create a user as an administrator and send them the creation mail
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<AdminUserDto>,
) -> ApiResult<impl IntoResponse> {
    if payload.id.is_some() {
        return Err(ApiError::BadRequest(
            "A new user cannot already have an ID".to_string(),
        ));
    }

    let user = state.account_service.create_user(&payload).await?;
    let created = UserWithAuthorities {
        user: user.clone(),
        authorities: payload.authorities.clone(),
    };

    let mail_service = state.mail_service.clone();
    tokio::spawn(async move {
        mail_service.send_creation_email(&user).await;
    });

    Ok((StatusCode::CREATED, Json(AdminUserDto::from(&created))))
}

pub async fn update_user(
    State(state): State<AppState>,
    Json(payload): Json<AdminUserDto>,
) -> ApiResult<impl IntoResponse> {
    let updated = state
        .account_service
        .update_user(&payload)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(AdminUserDto::from(&updated)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(login): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .account_service
        .get_user_with_authorities_by_login(&login)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(AdminUserDto::from(&user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(login): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.account_service.delete_user(&login).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Activated users only
pub async fn get_public_users(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .account_service
        .get_all_public_users(&query.request())
        .await?;
    Ok(Json(page))
}

pub async fn get_authorities(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.account_service.get_authorities().await?))
}

pub async fn get_authority(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let authority = state
        .account_service
        .get_authority(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Authority {} not found", name)))?;

    Ok(Json(authority))
}

pub async fn get_operations(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .ledger
        .find_all_operations_with_accounts(&query.request())
        .await?;
    Ok(Json(page))
}

/// Get an operation together with its bank account
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let operation = state
        .ledger
        .find_operation_with_account(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Operation not found".to_string()))?;

    Ok(Json(operation))
}
