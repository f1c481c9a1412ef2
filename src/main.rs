mod app;
mod config;
mod db;
mod migrations;
mod routes;
mod state;
mod templates;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "microblog=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;

    // The greeting pages never touch the database, so a failed migration
    // run is not fatal here.
    if let Err(e) = migrations::upgrade(&app_state.db).await {
        tracing::warn!(error = %e, "schema migration failed; continuing");
    }

    let app = app::build_app(app_state);
    app::serve(app).await
}
