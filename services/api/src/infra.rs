use car_insurance::config::{AppConfig, DatabaseConfig};
use car_insurance::error::AppError;
use car_insurance::insurance::PgInsuranceRepository;
use car_insurance::telemetry;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Loads configuration and installs the tracing subscriber.
pub(crate) fn bootstrap() -> Result<AppConfig, AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    Ok(config)
}

pub(crate) async fn connect_postgres(
    database: &DatabaseConfig,
) -> Result<Arc<PgInsuranceRepository>, AppError> {
    let url = database.require_url()?;
    let repository = PgInsuranceRepository::connect_and_migrate(
        url,
        database.max_connections,
        database.timeout,
    )
    .await?;
    info!(
        max_connections = database.max_connections,
        "connected to postgres and applied migrations"
    );
    Ok(Arc::new(repository))
}
