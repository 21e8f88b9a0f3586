mod app;
mod auth;
mod clock;
mod config;
mod error;
mod extract;
mod mail;
mod state;
mod users;

#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "accounts=debug,axum=info,tower_http=info".to_string());
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

    let (app_state, db) = state::AppState::init().await?;

    sqlx::migrate!("./migrations").run(&db).await?;

    users::services::bootstrap_admin(&app_state).await?;

    app::serve(app::build_app(app_state)).await
}
