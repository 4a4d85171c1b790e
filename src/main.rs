use axum::Router;
use huddle::{AppState, config::Config, db, groups, messages, rooms};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url).await?;
    db::init(&db_pool).await?;
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let state = AppState::new(
        db_pool,
        config.jwt_secret.as_bytes(),
        config.upload_dir.clone(),
    );

    let app = Router::new()
        .merge(rooms::router())
        .nest("/groups", groups::router())
        .nest("/messages", messages::router())
        .nest_service("/uploads", ServeDir::new(&config.upload_dir))
        .with_state(state)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
