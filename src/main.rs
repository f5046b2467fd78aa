use axum::middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iknoweverything::{
    api::rate_limiter::{rate_limit_middleware, RateLimiter},
    api::routes,
    config::Config,
    relay::{ChatRelay, RelaySettings},
    services::completion_client::CompletionClient,
    storage::{self, repository::SeaOrmConversationRepository},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iknoweverything=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load config
    let config = Config::load()?;
    let completion_url = config.completion_url.clone();

    // Initialize database
    let db_conn = storage::init_db(&config.database_url, config.max_connections).await?;
    let repository = Arc::new(SeaOrmConversationRepository::new(db_conn));

    // Upstream completion client
    let completion = Arc::new(CompletionClient::new(
        config.completion_url.clone(),
        config.completion_api_key.clone(),
        config.completion_model.clone(),
    ));

    // Verify upstream health on startup
    match completion.health_check().await {
        Ok(true) => {
            tracing::info!("✅ Completion API connected successfully");

            if let Ok(models) = completion.list_models().await {
                if !models.is_empty() {
                    tracing::info!("📊 Available models: {}", models.join(", "));
                }
            }
        }
        Ok(false) => tracing::warn!("⚠️ Completion API health check returned false"),
        Err(e) => tracing::warn!(
            "⚠️ Completion API not available: {}. Chat requests will fail until it is.",
            e
        ),
    }

    let relay = Arc::new(ChatRelay::new(
        repository.clone(),
        completion,
        RelaySettings {
            context_window: config.context_window_messages,
            system_prompt: config.system_prompt.clone(),
            title_max_chars: config.title_max_chars,
        },
    ));

    let port = config.server_port;
    let cors_enabled = config.cors_enabled;
    let rate_limit = config.effective_rate_limit();

    let state = routes::AppState {
        config: Arc::new(RwLock::new(config)),
        repo: repository,
        relay,
    };

    let limiter = RateLimiter::new(rate_limit);

    // Evict stale rate-limit windows in the background
    let cleanup_limiter = limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup_expired().await;
        }
    });

    let mut app = routes::create_router(state).layer(middleware::from_fn_with_state(
        limiter,
        rate_limit_middleware,
    ));

    if cors_enabled {
        app = app.layer(CorsLayer::permissive());
    }

    // Start server
    let addr_str = format!("127.0.0.1:{}", port);
    let addr: SocketAddr = addr_str.parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 Server listening on {}", addr);
    tracing::info!("🧠 Completion API: {}", completion_url);
    tracing::info!("💬 Chat relay: POST /api/v1/conversations/{{id}}/chat");

    axum::serve(listener, app).await?;

    Ok(())
}
