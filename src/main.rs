use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gym_access::api::{self, AppState};
use gym_access::auth::{Authenticator, Sha256Verifier, TokenLedger};
use gym_access::config::{self, Config};
use gym_access::jobs;
use gym_access::models::token::TokenSummary;
use gym_access::models::user::{User, UserRecord, UserRole};
use gym_access::registry::AssignmentRegistry;
use gym_access::store::postgres::PgStore;
use gym_access::store::{CredentialStore, Stores};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "gym-access"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "gym_access=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::User { command }) => {
            let db = connect_admin(&cfg).await?;
            handle_user_command(&db, command).await
        }
        Some(cli::Commands::Token { command }) => {
            let db = connect_admin(&cfg).await?;
            handle_token_command(db, command).await
        }
        Some(cli::Commands::Trainee { command }) => {
            let db = connect_admin(&cfg).await?;
            handle_trainee_command(db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let stores = Stores::from_config(&cfg).await?;
    tracing::info!(
        store = ?cfg.store,
        auth_mode = ?cfg.auth_mode,
        exempt = ?cfg.auth_exempt_paths,
        "configuration loaded"
    );

    let state = Arc::new(AppState::new(cfg, stores));

    let app = api::router(state.clone()).layer({
        use axum::http::{HeaderName, Method};
        use tower_http::cors::AllowOrigin;
        let app_origin = std::env::var("GYM_APP_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(move |origin, _| {
                let origin_str = origin.to_str().unwrap_or("");
                origin_str == app_origin
                    || origin_str.starts_with("http://localhost:")
                    || origin_str.starts_with("http://127.0.0.1:")
            }))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([
                HeaderName::from_static("content-type"),
                HeaderName::from_static("authorization"),
                HeaderName::from_static("username"),
                HeaderName::from_static("password"),
                HeaderName::from_static("x-request-id"),
            ])
    });

    jobs::sweep::spawn(state.attempts.clone());
    tracing::info!("Background sweep job started (login attempts every 60s)");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("gym-access listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn connect_admin(cfg: &Config) -> anyhow::Result<PgStore> {
    let url = cfg
        .database_url
        .as_deref()
        .context("admin commands require DATABASE_URL")?;
    let db = PgStore::connect(url).await?;
    db.migrate().await?;
    Ok(db)
}

async fn lookup_user(db: &PgStore, username: &str) -> anyhow::Result<User> {
    db.lookup(username)
        .await?
        .map(|record| record.identity())
        .ok_or_else(|| anyhow::anyhow!("User not found: {}", username))
}

async fn handle_user_command(db: &PgStore, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::Add {
            username,
            password,
            role,
        } => {
            let role = UserRole::parse(&role)
                .ok_or_else(|| anyhow::anyhow!("Invalid role '{}': expected trainee or trainer", role))?;
            if username.trim().is_empty() || password.is_empty() {
                anyhow::bail!("username and password must not be empty");
            }
            db.create_user(&UserRecord {
                username: username.clone(),
                password_hash: Sha256Verifier::hash(&password),
                active: true,
                role,
            })
            .await
            .with_context(|| format!("could not create user {}", username))?;
            println!("User created: {} ({})", username, role.as_str());
        }
        cli::UserCommands::Deactivate {
            username,
            revoke_tokens,
        } => {
            if !db.set_active(&username, false).await? {
                anyhow::bail!("User not found: {}", username);
            }
            println!("User deactivated: {}", username);
            if revoke_tokens {
                let ledger = TokenLedger::new(Arc::new(db.clone()), Arc::new(db.clone()));
                let user = lookup_user(db, &username).await?;
                let count = ledger.revoke_all_for_user(&user).await?;
                println!("Revoked {} token(s).", count);
            }
        }
        cli::UserCommands::Activate { username } => {
            if !db.set_active(&username, true).await? {
                anyhow::bail!("User not found: {}", username);
            }
            println!("User activated: {}", username);
        }
        cli::UserCommands::Passwd { username, password } => {
            let auth = Authenticator::with_sha256(Arc::new(db.clone()));
            auth.reset_password(&username, &password)
                .await
                .with_context(|| format!("could not change password of {}", username))?;
            println!("Password changed: {}", username);

            let ledger = TokenLedger::new(Arc::new(db.clone()), Arc::new(db.clone()));
            let user = lookup_user(db, &username).await?;
            let count = ledger.revoke_all_for_user(&user).await?;
            println!("Revoked {} token(s).", count);
        }
    }
    Ok(())
}

async fn handle_token_command(db: PgStore, cmd: cli::TokenCommands) -> anyhow::Result<()> {
    let ledger = TokenLedger::new(Arc::new(db.clone()), Arc::new(db.clone()));

    match cmd {
        cli::TokenCommands::Issue { username } => {
            let user = lookup_user(&db, &username).await?;
            let token = ledger.issue(&user).await?;
            println!(
                "Token issued for {}:\n  Use:   Authorization: Bearer {}",
                user.username, token.value
            );
        }
        cli::TokenCommands::List { username } => {
            let user = lookup_user(&db, &username).await?;
            let tokens = ledger.find_valid_for_user(&user).await?;
            if tokens.is_empty() {
                println!("No valid tokens.");
            } else {
                println!("{:<24} {:<10} {:<30}", "TOKEN", "TYPE", "CREATED");
                for t in tokens.iter().map(TokenSummary::from) {
                    println!(
                        "{:<24} {:<10} {:<30}",
                        t.token,
                        t.token_type.as_str(),
                        t.created_at.to_rfc3339()
                    );
                }
            }
        }
        cli::TokenCommands::RevokeAll { username } => {
            let user = lookup_user(&db, &username).await?;
            let count = ledger.revoke_all_for_user(&user).await?;
            println!("Revoked {} token(s).", count);
        }
    }
    Ok(())
}

async fn handle_trainee_command(db: PgStore, cmd: cli::TraineeCommands) -> anyhow::Result<()> {
    let registry = AssignmentRegistry::new(Arc::new(db));
    match cmd {
        cli::TraineeCommands::SetTrainers { trainee, trainers } => {
            let trainers: Vec<String> = trainers
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            let set = registry.replace_trainer_list(&trainee, &trainers).await?;
            if set.is_empty() {
                println!("{} now has no trainers.", trainee);
            } else {
                let list: Vec<&str> = set.iter().map(String::as_str).collect();
                println!("{} now trains with: {}", trainee, list.join(", "));
            }
        }
    }
    Ok(())
}
