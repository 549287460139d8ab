//! Request gate: authenticates every request before it reaches a handler.
//!
//! Per request:
//!   1. exempt path → accepted without identity;
//!   2. no usable credentials → `MissingCredentials`;
//!   3. `Username`/`Password` headers → authenticator (`InvalidCredentials`);
//!   4. `Authorization: Bearer` → token ledger (`InvalidToken`);
//!   5. store failure or timeout → `InternalAuthError`.
//!
//! Accepted requests carry an `AuthContext` in their extensions.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::auth::{Authenticator, LoginAttempts, TokenLedger};
use crate::config::AuthMode;
use crate::errors::{AppError, AuthError, GateRejection};
use crate::models::token::mask;
use crate::models::user::User;

pub const USERNAME_HEADER: &str = "username";
pub const PASSWORD_HEADER: &str = "password";

/// How the caller proved its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Credentials,
    Bearer { token: String },
}

/// Identity attached to an accepted request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub method: AuthMethod,
}

#[derive(Debug)]
pub enum GateOutcome {
    Exempt,
    Accepted(AuthContext),
    Rejected(GateRejection),
}

enum Presented {
    Credentials { username: String, password: String },
    Bearer(String),
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The auth scheme is matched case-insensitively (RFC 7235).
fn bearer(headers: &HeaderMap) -> Option<&str> {
    let (scheme, token) = header(headers, "authorization")?.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

pub struct RequestGate {
    authenticator: Arc<Authenticator>,
    ledger: Arc<TokenLedger>,
    attempts: Arc<LoginAttempts>,
    mode: AuthMode,
    exempt: HashSet<String>,
    timeout: Duration,
}

impl RequestGate {
    pub fn new(
        authenticator: Arc<Authenticator>,
        ledger: Arc<TokenLedger>,
        attempts: Arc<LoginAttempts>,
        mode: AuthMode,
        exempt: impl IntoIterator<Item = String>,
        timeout: Duration,
    ) -> Self {
        Self {
            authenticator,
            ledger,
            attempts,
            mode,
            exempt: exempt.into_iter().collect(),
            timeout,
        }
    }

    fn extract(&self, headers: &HeaderMap) -> Option<Presented> {
        if self.mode.accepts_credentials() {
            // a pair with one half missing counts as no credentials
            if let (Some(username), Some(password)) = (
                header(headers, USERNAME_HEADER),
                headers.get(PASSWORD_HEADER).and_then(|v| v.to_str().ok()),
            ) {
                if !password.is_empty() {
                    return Some(Presented::Credentials {
                        username: username.to_string(),
                        password: password.to_string(),
                    });
                }
            }
        }
        if self.mode.accepts_bearer() {
            if let Some(token) = bearer(headers) {
                return Some(Presented::Bearer(token.to_string()));
            }
        }
        None
    }

    pub async fn evaluate(&self, path: &str, headers: &HeaderMap) -> GateOutcome {
        if self.exempt.contains(path) {
            return GateOutcome::Exempt;
        }

        let Some(presented) = self.extract(headers) else {
            tracing::debug!(path = %path, "no credentials presented");
            return GateOutcome::Rejected(GateRejection::MissingCredentials);
        };

        match tokio::time::timeout(self.timeout, self.check(presented)).await {
            Ok(Ok(ctx)) => GateOutcome::Accepted(ctx),
            Ok(Err(rejection)) => GateOutcome::Rejected(rejection),
            Err(_) => {
                tracing::error!(
                    path = %path,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "authentication check timed out"
                );
                GateOutcome::Rejected(GateRejection::InternalAuthError)
            }
        }
    }

    async fn check(&self, presented: Presented) -> Result<AuthContext, GateRejection> {
        match presented {
            Presented::Credentials { username, password } => {
                if self.attempts.is_blocked(&username) {
                    tracing::warn!(username = %username, "credentials refused: username blocked");
                    return Err(GateRejection::InvalidCredentials);
                }
                match self.authenticator.authenticate(&username, &password).await {
                    Ok(user) => {
                        self.attempts.reset(&username);
                        tracing::debug!(username = %username, "authenticated by credentials");
                        Ok(AuthContext {
                            user,
                            method: AuthMethod::Credentials,
                        })
                    }
                    Err(AuthError::Store(e)) => {
                        tracing::error!("credential store failure during authentication: {}", e);
                        Err(GateRejection::InternalAuthError)
                    }
                    Err(e) => {
                        self.attempts.register_failure(&username);
                        tracing::warn!(username = %username, reason = %e, "authentication failed");
                        Err(GateRejection::InvalidCredentials)
                    }
                }
            }
            Presented::Bearer(token) => match self.ledger.validate(&token).await {
                Ok(user) => {
                    tracing::debug!(username = %user.username, "authenticated by token");
                    Ok(AuthContext {
                        user,
                        method: AuthMethod::Bearer { token },
                    })
                }
                Err(AuthError::Store(e)) => {
                    tracing::error!("token store failure during validation: {}", e);
                    Err(GateRejection::InternalAuthError)
                }
                Err(e) => {
                    tracing::warn!(token = %mask(&token), reason = %e, "token rejected");
                    Err(GateRejection::InvalidToken)
                }
            },
        }
    }
}

/// Axum middleware wrapping `RequestGate::evaluate`.
pub async fn gate_middleware(
    State(gate): State<Arc<RequestGate>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    match gate.evaluate(req.uri().path(), req.headers()).await {
        GateOutcome::Exempt => Ok(next.run(req).await),
        GateOutcome::Accepted(ctx) => {
            req.extensions_mut().insert(ctx);
            Ok(next.run(req).await)
        }
        GateOutcome::Rejected(rejection) => Err(rejection.into()),
    }
}
