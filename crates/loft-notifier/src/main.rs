use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use loft_realtime::{
    ClientConfig, DesktopPermission, HttpCountSource, RealtimeSession, SessionDeps, TracingAudio,
    TracingPresenter, WsTransport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loft_notifier=info,loft_realtime=info".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    info!(user_id = %config.user_id, api = %config.api_url, realtime = %config.realtime_url, "starting notifier");

    let session = RealtimeSession::new(
        config.user_id,
        config.realtime.clone(),
        SessionDeps {
            counts: Arc::new(HttpCountSource::new(&config.api_url, &config.access_token)?),
            presenter: Arc::new(TracingPresenter::new(DesktopPermission::Default)),
            audio: Arc::new(TracingAudio),
            transport: Arc::new(WsTransport::new(&config.realtime_url, &config.access_token)),
        },
    );
    // Launching the process is the user's gesture.
    session.notify_user_gesture();

    let mut events = session.subscribe_events();
    session.start().await;

    let mut last = session.snapshot();
    let mut status = tokio::time::interval(config.realtime.refresh_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let detail = serde_json::to_string(&event).unwrap_or_default();
                    info!(event = event.name(), %detail, "app event");
                }
                Err(RecvError::Lagged(n)) => warn!("missed {} app events", n),
                Err(RecvError::Closed) => break,
            },
            _ = status.tick() => {
                let now = session.snapshot();
                if now != last {
                    info!(
                        messages = now.unread_messages_count,
                        notifications = now.unread_notifications_count,
                        online = now.is_online,
                        realtime = session.realtime_healthy(),
                        "unread counts"
                    );
                    last = now;
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
