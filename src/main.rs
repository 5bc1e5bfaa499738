use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nlsql_pipeline::config::Config;
use nlsql_pipeline::db;
use nlsql_pipeline::{router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("nlsql-pipeline.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        // `_guard` must outlive the process for the non-blocking writer to
        // flush; leak it deliberately rather than thread it through main.
        std::mem::forget(_guard);
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("nlsql-pipeline starting up");

    let pool = db::create_pool(&config.database.url, config.database.pool_size).await?;
    tracing::info!("read-only connection pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("migrations applied");

    let state = AppState::new(config.clone(), pool);
    let app = router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("nlsql-pipeline listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
