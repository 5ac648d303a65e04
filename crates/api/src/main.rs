use collegecm_api::config::{ApiConfig, StartupError};
use collegecm_api::http;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        eprintln!("STARTUP_ERROR {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = ApiConfig::load()?;
    let store = http::connect_store(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|err| StartupError {
            code: "ERR_BIND_FAILED",
            message: format!("failed to bind api listener on {}: {}", config.bind_addr, err),
        })?;
    tracing::info!(bind_addr = %config.bind_addr, "collegecm-api listening");

    let served = axum::serve(listener, http::app(config, store.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    store.close().await;

    served.map_err(|err| StartupError {
        code: "ERR_SERVER_FAILED",
        message: err.to_string(),
    })
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    tracing::info!("collegecm-api shutting down");
}
