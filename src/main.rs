use tokio::net::TcpListener;

use relay_server::config::{generate_config_template, Config};
use relay_server::routes;
use relay_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "relay_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "relay_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("relay-server v{} starting", env!("CARGO_PKG_VERSION"));

    if config.api_key.is_none() {
        tracing::warn!("AUTH_API_KEY is not set, proxy requests will be rejected with 500");
    }

    let app_state = AppState::new(config.api_key.clone());
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    tracing::info!("WebSocket endpoint available at ws://{}/v1/ws", addr);
    tracing::info!("HTTP proxy available at http://{}/", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
