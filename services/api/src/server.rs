use crate::cli::{ServeArgs, SweepArgs};
use crate::infra::{seed_store, AppState};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Local;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tpa_core::adjudication::{AdjudicationApi, InMemoryAdjudicationService};
use tpa_core::config::AppConfig;
use tpa_core::error::AppError;
use tpa_core::telemetry;
use tracing::{error, info};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let seeded = seed_store(
        config.adjudication.coverage_resolver(),
        Local::now().date_naive(),
    )?;
    spawn_maintenance(seeded.service.clone(), config.adjudication.sweep_interval());

    let api = Arc::new(AdjudicationApi::new(
        seeded.service,
        config.adjudication.super_admin_role.clone(),
    ));
    let app = with_operational_routes(api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, policy_id = %seeded.policy_id, "adjudication service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Run the expiry sweeps on a fixed period for the lifetime of the server.
fn spawn_maintenance(service: Arc<InMemoryAdjudicationService>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let today = Local::now().date_naive();
            match service.run_maintenance(today) {
                Ok(report) => info!(
                    %today,
                    expired_policies = report.expired_policies.len(),
                    expired_pre_authorizations = report.expired_pre_authorizations.len(),
                    "maintenance sweep finished"
                ),
                Err(err) => error!(%today, error = %err, "maintenance sweep failed"),
            }
        }
    });
}

pub(crate) fn sweep_once(args: SweepArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let seeded = seed_store(config.adjudication.coverage_resolver(), Local::now().date_naive())?;
    let report = seeded.service.run_maintenance(today)?;

    println!("Maintenance sweep for {today}");
    println!("  expired policies: {}", join_ids(&report.expired_policies));
    println!(
        "  expired pre-authorizations: {}",
        join_ids(&report.expired_pre_authorizations)
    );
    Ok(())
}

fn join_ids<T: std::fmt::Display>(ids: &[T]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
