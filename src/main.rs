use std::sync::Arc;

use anyhow::Context;

use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, Method,
};
use dotenv::dotenv;
use jobflow::{
    config::Config,
    db::{db::DBClient, memstore::MemoryStore, store::EntityStore},
    middleware::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER},
    routes::create_router,
    service::{
        lifecycle_service::LifecycleService,
        notification_service::{LogDispatcher, NotificationDispatcher, NotificationService},
    },
    AppState,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::init();

    tracing_subscriber::fmt()
        .with_max_level(config.log_filter())
        .init();

    let (store, notifier): (Arc<dyn EntityStore>, Arc<dyn NotificationDispatcher>) =
        match &config.database_url {
            Some(database_url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.db_max_connections)
                    .connect(database_url)
                    .await
                    .context("Failed to connect to the database")?;
                tracing::info!("Connection to the database is successful");

                let db_client = Arc::new(DBClient::new(pool));
                db_client
                    .migrate()
                    .await
                    .context("Failed to run migrations")?;

                let store: Arc<dyn EntityStore> = db_client.clone();
                let notifier: Arc<dyn NotificationDispatcher> =
                    Arc::new(NotificationService::new(db_client));
                (store, notifier)
            }
            None => {
                tracing::warn!("DATABASE_URL is not set, state is kept in memory only");
                let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
                let notifier: Arc<dyn NotificationDispatcher> = Arc::new(LogDispatcher);
                (store, notifier)
            }
        };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static(ACTOR_ID_HEADER),
            HeaderName::from_static(ACTOR_ROLE_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE]);

    let app_state = AppState {
        env: config.clone(),
        lifecycle: LifecycleService::new(store, notifier),
    };

    let app = create_router(Arc::new(app_state)).layer(cors);

    tracing::info!("Server is running on http://localhost:{}", config.port);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    axum::serve(listener, app).await.context("Server stopped")?;

    Ok(())
}
