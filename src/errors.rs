use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures of the authenticator and the token ledger. The variants stay
/// distinct for logging; the gate collapses them before anything leaves
/// the process.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user not found")]
    NotFound,

    #[error("bad credentials or inactive account")]
    Unauthorized,

    #[error("token not found")]
    TokenNotFound,

    #[error("token revoked")]
    TokenRevoked,

    #[error("new password must not be empty")]
    EmptyPassword,

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Why the request gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid token")]
    InvalidToken,

    #[error("internal authentication error")]
    InternalAuthError,
}

/// Failures of the assignment registry.
#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("unknown or inactive trainers: {}", .0.join(", "))]
    UnknownTrainers(Vec<String>),

    #[error("trainee '{0}' not found")]
    TraineeNotFound(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("request rejected: {0}")]
    Rejected(GateRejection),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<GateRejection> for AppError {
    fn from(r: GateRejection) -> Self {
        AppError::Rejected(r)
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Store(e) => AppError::Internal(e),
            AuthError::NotFound | AuthError::Unauthorized => {
                AppError::Rejected(GateRejection::InvalidCredentials)
            }
            AuthError::TokenNotFound | AuthError::TokenRevoked => {
                AppError::Rejected(GateRejection::InvalidToken)
            }
            AuthError::EmptyPassword => {
                AppError::BadRequest("new password must not be empty".into())
            }
        }
    }
}

fn internal() -> (StatusCode, &'static str, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal_server_error",
        "internal server error".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut details = None;
        let (status, error_type, code, msg) = match &self {
            // One shape for every client-side authentication failure, so a
            // caller cannot tell a wrong password from an unknown user.
            AppError::Rejected(
                GateRejection::MissingCredentials
                | GateRejection::InvalidCredentials
                | GateRejection::InvalidToken,
            ) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "authentication failed".to_string(),
            ),
            AppError::Rejected(GateRejection::InternalAuthError) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "internal_error",
                "authentication_unavailable",
                "authentication is temporarily unavailable".to_string(),
            ),
            AppError::Forbidden(reason) => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "forbidden",
                reason.clone(),
            ),
            AppError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                reason.clone(),
            ),
            AppError::Assignment(AssignmentError::UnknownTrainers(names)) => {
                details = Some(json!({ "unknown_trainers": names }));
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "invalid_request_error",
                    "unknown_trainer",
                    self.to_string(),
                )
            }
            AppError::Assignment(AssignmentError::TraineeNotFound(_)) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "trainee_not_found",
                self.to_string(),
            ),
            AppError::Assignment(AssignmentError::Store(e)) => {
                tracing::error!("Assignment store error: {}", e);
                internal()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                internal()
            }
        };

        let mut error = json!({
            "message": msg,
            "type": error_type,
            "code": code,
        });
        if let Some(d) = details {
            error["details"] = d;
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "www-authenticate",
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }

        response
    }
}
