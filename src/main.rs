use std::sync::Arc;

use taskboard::config::AppConfig;
use taskboard::db::{self, MemoryStore, PgStore, Store};
use taskboard::routes;
use taskboard::services::auth::SessionVerifier;
use taskboard::services::invitation;
use taskboard::state::AppState;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();
    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store, nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let verifier = Arc::new(SessionVerifier::new(store.clone()));
    let port = config.port;
    let state = AppState::new(store, verifier, config);

    // Spawn background invitation expiry sweep.
    let _sweep = invitation::spawn_sweep_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "taskboard listening");
    axum::serve(listener, app).await.expect("server failed");
}
