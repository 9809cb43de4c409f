mod config;
mod db;
mod frame;
mod routes;
mod services;
mod state;
mod store;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env().expect("invalid configuration");
    let port = config.port;

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    tokio::fs::create_dir_all(config.storage_dir.join("attachments"))
        .await
        .expect("failed to create attachment directory");

    let state = state::AppState::new(pool, config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "chatroom listening");
    axum::serve(listener, app).await.expect("server failed");
}
