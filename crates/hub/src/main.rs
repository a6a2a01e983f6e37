mod config;
mod db;
mod dispatch;
mod feeds;
mod history;
mod light;
mod live;
mod notifications;
mod reading;
mod state;
mod status;
mod synthetic;
mod thresholds;
mod web;
mod wire;

use anyhow::Result;
use std::{env, sync::Arc};
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::EnvFilter;

use db::Db;
use feeds::{FeedEvent, EVENT_QUEUE};
use state::{Applied, SharedState, SystemState};
use web::AppState;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:agro.db?mode=rwc".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "agro.toml".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (seed plantations) ──────────────────────────────
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;

    // Plantations come from the DB: configured ones plus any added at runtime.
    let plantations = db.load_plantations().await?;
    let thresholds = web::reload_thresholds(&db).await?;
    tracing::info!(plantations = plantations.len(), "db ready");

    // ── Shared state + feeds ────────────────────────────────────────
    let (tx, rx) = mpsc::channel::<FeedEvent>(EVENT_QUEUE);
    let shared: SharedState = Arc::new(RwLock::new(SystemState::new(
        thresholds,
        cfg.feed_settings(),
        tx,
    )));
    {
        let mut st = shared.write().await;
        for p in &plantations {
            if let Err(e) = st.add_plantation(&p.id, &p.name, p.source) {
                tracing::warn!(plantation = %p.id, "skipping stored plantation: {e}");
            }
        }
        st.record_system("hub started".to_string());
    }

    // ── Web server ──────────────────────────────────────────────────
    let app = AppState {
        state: Arc::clone(&shared),
        db: db.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app, web_port).await {
            tracing::error!("{e:#}");
        }
    });

    // ── Reading consumer ────────────────────────────────────────────
    tokio::select! {
        _ = consume(Arc::clone(&shared), db, rx) => {
            tracing::warn!("feed channel closed");
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("signal handler failed: {e}");
            }
            tracing::info!("shutting down");
        }
    }

    shared.write().await.shutdown_all();
    Ok(())
}

/// Apply feed events in arrival order. Accepted readings are logged to the
/// DB; a failed write never stops the loop.
async fn consume(shared: SharedState, db: Db, mut rx: mpsc::Receiver<FeedEvent>) {
    while let Some(ev) = rx.recv().await {
        let applied = shared.write().await.apply(ev);

        if let Applied::Reading {
            plantation_id,
            reading,
        } = applied
        {
            if let Err(e) = db.insert_reading(&plantation_id, &reading).await {
                tracing::warn!(plantation = %plantation_id, "db: {e:#}");
                shared
                    .write()
                    .await
                    .record_error(format!("db: insert_reading failed for {plantation_id}: {e}"));
            }
        }
    }
}
