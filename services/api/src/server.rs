use crate::cli::ServeArgs;
use crate::infra::{build_engine, AppState, InMemorySnapshotStore};
use crate::routes::with_underwriting_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;
use underwriting::config::AppConfig;
use underwriting::error::AppError;
use underwriting::telemetry;
use underwriting::workflows::underwriting::{
    FileSnapshotStore, SnapshotStore, UnderwritingEngine, UnderwritingService,
};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let engine = Arc::new(build_engine(&config.underwriting)?);

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        engine: engine.clone(),
    };

    let app = match &config.underwriting.snapshot_dir {
        Some(dir) => {
            info!(snapshot_dir = %dir.display(), "recording snapshots on disk");
            application(engine, Arc::new(FileSnapshotStore::new(dir)))
        }
        None => {
            info!("recording snapshots in memory");
            application(engine, Arc::new(InMemorySnapshotStore::default()))
        }
    }
    .layer(Extension(app_state))
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "underwriting service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn application<S>(engine: Arc<UnderwritingEngine>, store: Arc<S>) -> axum::Router
where
    S: SnapshotStore + 'static,
{
    with_underwriting_routes(Arc::new(UnderwritingService::new(engine, store)))
}
