use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use loft_api::auth::{AppState, AppStateInner, create_token};
use loft_db::Database;
use loft_gateway::dispatcher::Dispatcher;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const DEV_TOKEN_TTL_HOURS: i64 = 24 * 7;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loft=debug,loft_api=debug,loft_gateway=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("LOFT_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: LOFT_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }
    let db_path = std::env::var("LOFT_DB_PATH").unwrap_or_else(|_| "loft.db".into());
    let host = std::env::var("LOFT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("LOFT_PORT")
        .unwrap_or_else(|_| "3210".into())
        .parse()?;

    let db = Database::open(&PathBuf::from(&db_path))?;

    // `loft issue-token <user-id> <full name>`: register a profile and print
    // a session token for it, for local runs of the notifier.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("issue-token") {
        return issue_token(&db, &jwt_secret, &args[1..]);
    }

    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
    });

    let app = Router::new()
        .merge(loft_api::router(app_state))
        .merge(loft_gateway::router(dispatcher, &jwt_secret))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Loft server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Loft server stopped");
    Ok(())
}

fn issue_token(db: &Database, jwt_secret: &str, args: &[String]) -> anyhow::Result<()> {
    let (Some(user_id), Some(full_name)) = (args.first(), args.get(1)) else {
        anyhow::bail!("usage: loft issue-token <user-id> <full name>");
    };
    let user_id: Uuid = user_id.parse()?;
    let email = args.get(2).map(String::as_str);

    db.upsert_profile(&user_id.to_string(), full_name, email)?;
    let token = create_token(
        jwt_secret,
        user_id,
        email.unwrap_or_default(),
        chrono::Duration::hours(DEV_TOKEN_TTL_HOURS),
    )?;
    println!("{token}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
