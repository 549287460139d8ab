use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Which persistence backend serves the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

/// Which request credentials the gate honours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `Username` + `Password` headers only.
    Credentials,
    /// `Authorization: Bearer` only.
    Bearer,
    /// Either; credentials are tried first when both are sent.
    Both,
}

impl AuthMode {
    pub fn accepts_credentials(&self) -> bool {
        matches!(self, AuthMode::Credentials | AuthMode::Both)
    }

    pub fn accepts_bearer(&self) -> bool {
        matches!(self, AuthMode::Bearer | AuthMode::Both)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub auth_mode: AuthMode,
    /// Literal request paths that skip authentication.
    pub auth_exempt_paths: Vec<String>,
    /// Upper bound on one credential/token check.
    pub auth_timeout: Duration,
    /// Failed credential checks before a username is blocked.
    pub login_max_attempts: u32,
    pub login_block: Duration,
    /// When set, login revokes the user's other sessions.
    pub login_supersedes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            store: StoreBackend::Memory,
            database_url: None,
            auth_mode: AuthMode::Both,
            auth_exempt_paths: vec!["/healthz".into(), "/readyz".into()],
            auth_timeout: Duration::from_millis(2000),
            login_max_attempts: 3,
            login_block: Duration::from_secs(300),
            login_supersedes: false,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from an arbitrary variable source. Unset variables take
/// their defaults; set but malformed ones are an error.
pub fn from_lookup<F>(get: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();
    let database_url = get("DATABASE_URL").filter(|s| !s.is_empty());

    let store = match get("GYM_STORE").as_deref() {
        Some("memory") => StoreBackend::Memory,
        Some("postgres") => StoreBackend::Postgres,
        Some(other) => anyhow::bail!("GYM_STORE must be 'memory' or 'postgres', got '{}'", other),
        None if database_url.is_some() => StoreBackend::Postgres,
        None => StoreBackend::Memory,
    };

    if store == StoreBackend::Postgres && database_url.is_none() {
        anyhow::bail!("GYM_STORE=postgres requires DATABASE_URL");
    }

    let auth_mode = match get("GYM_AUTH_MODE").as_deref() {
        None => defaults.auth_mode,
        Some("credentials") => AuthMode::Credentials,
        Some("bearer") => AuthMode::Bearer,
        Some("both") => AuthMode::Both,
        Some(other) => anyhow::bail!(
            "GYM_AUTH_MODE must be 'credentials', 'bearer' or 'both', got '{}'",
            other
        ),
    };

    let auth_exempt_paths = match get("GYM_AUTH_EXEMPT_PATHS") {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => defaults.auth_exempt_paths,
    };

    Ok(Config {
        port: parse_var(&get, "GYM_PORT")?.unwrap_or(defaults.port),
        store,
        database_url,
        auth_mode,
        auth_exempt_paths,
        auth_timeout: parse_var::<u64, _>(&get, "GYM_AUTH_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.auth_timeout),
        login_max_attempts: parse_var(&get, "GYM_LOGIN_MAX_ATTEMPTS")?
            .unwrap_or(defaults.login_max_attempts),
        login_block: parse_var::<u64, _>(&get, "GYM_LOGIN_BLOCK_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.login_block),
        login_supersedes: parse_var(&get, "GYM_LOGIN_SUPERSEDES")?
            .unwrap_or(defaults.login_supersedes),
    })
}

fn parse_var<T, F>(get: &F, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_use_memory_store() {
        let cfg = from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.store, StoreBackend::Memory);
        assert_eq!(cfg.auth_mode, AuthMode::Both);
        assert_eq!(cfg.auth_exempt_paths, vec!["/healthz", "/readyz"]);
        assert_eq!(cfg.login_max_attempts, 3);
        assert_eq!(cfg.login_block, Duration::from_secs(300));
        assert!(!cfg.login_supersedes);
    }

    #[test]
    fn test_database_url_selects_postgres() {
        let cfg = from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/gym")])).unwrap();
        assert_eq!(cfg.store, StoreBackend::Postgres);
    }

    #[test]
    fn test_explicit_memory_wins_over_database_url() {
        let cfg = from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/gym"),
            ("GYM_STORE", "memory"),
        ]))
        .unwrap();
        assert_eq!(cfg.store, StoreBackend::Memory);
    }

    #[test]
    fn test_postgres_without_url_is_rejected() {
        assert!(from_lookup(lookup(&[("GYM_STORE", "postgres")])).is_err());
    }

    #[test]
    fn test_exempt_paths_are_trimmed() {
        let cfg = from_lookup(lookup(&[("GYM_AUTH_EXEMPT_PATHS", " /healthz , ,/metrics ")])).unwrap();
        assert_eq!(cfg.auth_exempt_paths, vec!["/healthz", "/metrics"]);
    }

    #[test]
    fn test_malformed_number_names_the_variable() {
        let err = from_lookup(lookup(&[("GYM_AUTH_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("GYM_AUTH_TIMEOUT_MS"));
    }

    #[test]
    fn test_auth_mode_flags() {
        assert!(AuthMode::Both.accepts_bearer() && AuthMode::Both.accepts_credentials());
        assert!(!AuthMode::Bearer.accepts_credentials());
        assert!(!AuthMode::Credentials.accepts_bearer());
    }
}
