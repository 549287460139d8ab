use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AuthError, GateRejection};
use crate::middleware::gate::{AuthContext, AuthMethod};
use crate::models::assignment::{edges, Assignment};
use crate::models::token::TokenSummary;
use crate::models::user::UserRole;

use super::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub username: String,
    pub token: String,
    pub token_type: String,
}

#[derive(Serialize, Deserialize)]
pub struct RevokeResponse {
    pub revoked: u64,
}

#[derive(Serialize, Deserialize)]
pub struct ReplaceTrainersRequest {
    pub trainer_usernames: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ChangeLoginRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Serialize, Deserialize)]
pub struct TrainerListResponse {
    pub trainee: String,
    pub trainers: Vec<String>,
    pub assignments: Vec<Assignment>,
}

/// Malformed JSON gets the same error envelope as every other failure.
fn bad_body(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /user/login: exchange `Username`/`Password` headers for a bearer token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<LoginResponse>, AppError> {
    if ctx.method != AuthMethod::Credentials {
        return Err(AppError::BadRequest(
            "login requires Username and Password headers".into(),
        ));
    }

    let token = if state.config.login_supersedes {
        state.ledger.supersede(&ctx.user).await?
    } else {
        state.ledger.issue(&ctx.user).await?
    };

    Ok(Json(LoginResponse {
        username: ctx.user.username,
        token: token.value,
        token_type: "Bearer".into(),
    }))
}

/// POST /user/logout: revoke every session of the caller
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<RevokeResponse>, AppError> {
    let revoked = state.ledger.revoke_all_for_user(&ctx.user).await?;
    Ok(Json(RevokeResponse { revoked }))
}

/// DELETE /user/session: revoke only the token used for this request
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<RevokeResponse>, AppError> {
    let AuthMethod::Bearer { token } = &ctx.method else {
        return Err(AppError::BadRequest(
            "ending a session requires a bearer token".into(),
        ));
    };
    let revoked = state.ledger.revoke(token).await?;
    Ok(Json(RevokeResponse {
        revoked: u64::from(revoked),
    }))
}

/// GET /user/tokens: the caller's valid tokens, values masked
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<TokenSummary>>, AppError> {
    let tokens = state.ledger.find_valid_for_user(&ctx.user).await?;
    Ok(Json(tokens.iter().map(TokenSummary::from).collect()))
}

/// PUT /user/change-login: replace the caller's password and end every
/// session opened with the old one
pub async fn change_login(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    payload: Result<Json<ChangeLoginRequest>, JsonRejection>,
) -> Result<Json<RevokeResponse>, AppError> {
    let Json(payload) = payload.map_err(bad_body)?;
    let username = ctx.user.username.as_str();

    if state.attempts.is_blocked(username) {
        return Err(GateRejection::InvalidCredentials.into());
    }

    match state
        .authenticator
        .change_password(username, &payload.old_password, &payload.new_password)
        .await
    {
        Ok(_) => state.attempts.reset(username),
        Err(e @ (AuthError::NotFound | AuthError::Unauthorized)) => {
            state.attempts.register_failure(username);
            tracing::warn!(username = %username, reason = %e, "password change refused");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    }

    let revoked = state.ledger.revoke_all_for_user(&ctx.user).await?;
    Ok(Json(RevokeResponse { revoked }))
}

/// GET /trainee/:username/trainers: current trainer list
pub async fn get_trainers(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<TrainerListResponse>, AppError> {
    let trainers = state.registry.trainers_of(&username).await?;
    Ok(Json(TrainerListResponse {
        assignments: edges(&username, &trainers),
        trainers: trainers.into_iter().collect(),
        trainee: username,
    }))
}

/// PUT /trainee/:username/trainers: replace the trainer list; trainees
/// may only change their own
pub async fn replace_trainers(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(username): Path<String>,
    payload: Result<Json<ReplaceTrainersRequest>, JsonRejection>,
) -> Result<Json<TrainerListResponse>, AppError> {
    let Json(payload) = payload.map_err(bad_body)?;
    if ctx.user.role != UserRole::Trainee || ctx.user.username != username {
        tracing::warn!(
            caller = %ctx.user.username,
            trainee = %username,
            "trainer list change refused: not the owner"
        );
        return Err(AppError::Forbidden(
            "a trainee may only change its own trainer list".into(),
        ));
    }

    let trainers = state
        .registry
        .replace_trainer_list(&username, &payload.trainer_usernames)
        .await?;

    Ok(Json(TrainerListResponse {
        assignments: edges(&username, &trainers),
        trainers: trainers.into_iter().collect(),
        trainee: username,
    }))
}
