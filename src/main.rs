use purpleflea::config::Config;
use purpleflea::services::feed::run_http_source;
use purpleflea::{api, build_state};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "purpleflea=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!(
        "Starting Purple Flea engine on {}:{}",
        config.host, config.port
    );

    let (state, _triggers) = build_state(config)?;

    // Start the upstream price source, if configured.
    if let Some(url) = state.config.feed.source_url.clone() {
        let feed = state.feed.clone();
        let poll_ms = state.config.feed.poll_ms;
        tokio::spawn(run_http_source(feed, url, poll_ms));
    } else {
        info!("No FEED_URL configured; waiting for locally pushed ticks");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
