use crate::cli::ServeArgs;
use crate::infra::{
    assemble, spawn_notification_delivery, system_clock, AppState, ChannelNotificationSink,
    InMemoryProfileDirectory,
};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use leasekeeper::config::AppConfig;
use leasekeeper::error::AppError;
use leasekeeper::telemetry;
use leasekeeper::workflows::tenancy::spawn_auto_payment_task;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const DELIVERY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if args.no_scheduler {
        config.scheduler.enabled = false;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let (sender, receiver) = mpsc::unbounded_channel();
    let delivery = spawn_notification_delivery(receiver);
    let profiles = InMemoryProfileDirectory::default();
    let api = assemble(
        profiles.clone(),
        Arc::new(ChannelNotificationSink::new(sender)),
        system_clock(),
        config.scheduler.reminder_days,
    );

    let scheduler = if config.scheduler.enabled {
        Some(spawn_auto_payment_task(
            api.scheduler.clone(),
            config.scheduler.interval(),
            config.scheduler.reminder_days,
        ))
    } else {
        info!("auto payment task disabled by configuration");
        None
    };

    let app = with_operational_routes(api, profiles)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "leasekeeper api ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    readiness_flag.store(false, Ordering::Release);
    if let Some(handle) = scheduler {
        handle.shutdown().await;
    }
    match tokio::time::timeout(DELIVERY_DRAIN_TIMEOUT, delivery).await {
        Ok(Ok(delivered)) => info!(delivered, "notification queue drained"),
        Ok(Err(join_error)) => warn!(error = %join_error, "notification delivery task failed"),
        Err(_) => warn!("notification queue still open at shutdown"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
