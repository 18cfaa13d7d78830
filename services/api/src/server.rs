use crate::cli::ServeArgs;
use crate::infra::{bootstrap, connect_postgres, AppState};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use car_insurance::config::AppConfig;
use car_insurance::error::AppError;
use car_insurance::expiry::{ExpiryJob, ExpiryScheduler};
use car_insurance::insurance::{InMemoryInsuranceRepository, InsuranceRepository, InsuranceService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = bootstrap()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if args.with_scheduler {
        config.scheduler.enabled = true;
    }

    if config.database.url.is_some() {
        let repository = connect_postgres(&config.database).await?;
        let result = serve(&config, Arc::clone(&repository)).await;
        repository.close().await;
        result
    } else {
        warn!("DATABASE_URL is not set; using in-memory storage");
        serve(&config, Arc::new(InMemoryInsuranceRepository::default())).await
    }
}

async fn serve<R>(config: &AppConfig, repository: Arc<R>) -> Result<(), AppError>
where
    R: InsuranceRepository + 'static,
{
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let scheduler = config.scheduler.enabled.then(|| {
        let job = ExpiryJob::new(Arc::clone(&repository), config.scheduler.batch_size);
        ExpiryScheduler::spawn(job, config.scheduler.interval)
    });

    let service = InsuranceService::new(repository);
    let app = with_operational_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        scheduler = config.scheduler.enabled,
        "car insurance service ready"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    readiness_flag.store(false, Ordering::Release);
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    info!("car insurance service stopped");

    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
