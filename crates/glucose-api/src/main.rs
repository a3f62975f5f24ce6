use anyhow::Context;
use tracing_subscriber::EnvFilter;

mod admin;
mod config;
mod import;
mod levels;
mod prepopulate;
mod responses;
mod routes;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = config::load().context("loading configuration")?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.tracing.filter))
        .context("configuring tracing filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let store = glucose_db::create(&config.database);
    let app_state = AppState {
        store,
        pagination: config.pagination,
    };
    let app = routes::setup(app_state, &config.upload, &config.admin);
    let listener = tokio::net::TcpListener::bind((config.bind_address.as_str(), config.bind_port))
        .await
        .context("binding listener")?;
    tracing::info!(
        "listening on {}",
        listener.local_addr().context("reading bound address")?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving application")
}

#[derive(Clone)]
struct AppState {
    store: glucose_db::Store,
    pagination: config::PaginationConfig,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("installing Ctrl-C handler: {err}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("installing SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutting down");
}
