use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port = std::env::var("AGRIGATE_HTTP_PORT").unwrap_or_else(|_| "7878".to_string());
    let config_path = std::env::var("AGRIGATE_CONFIG").unwrap_or_else(|_| "agrigate.conf".to_string());
    info!(
        target: "agrigate",
        "agrigate starting: RUST_LOG='{}', http_port={}, config='{}'",
        rust_log, http_port, config_path
    );

    let port: u16 = http_port.parse().unwrap_or(7878);
    agrigate::server::run_with_port(port, &config_path).await
}
