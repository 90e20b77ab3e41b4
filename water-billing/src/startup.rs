//! Application startup and lifecycle management.

use crate::billing::BillingService;
use crate::config::BillingConfig;
use crate::services::{
    get_metrics, init_metrics, BillNotifier, BillingStore, Database, SmtpNotifier,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    store: Arc<dyn BillingStore>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "water-billing",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "water-billing",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    service: BillingService,
    schedule_interval: Option<Duration>,
}

impl Application {
    /// Build the application against PostgreSQL and SMTP.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    pub async fn build_without_migrations(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BillingConfig, run_migrations: bool) -> Result<Self, AppError> {
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let notifier = SmtpNotifier::new(config.smtp.clone()).map_err(|e| {
            tracing::error!(error = %e, "Failed to create SMTP notifier");
            AppError::EmailError(e.to_string())
        })?;

        Self::build_with_store(config, Arc::new(db), Arc::new(notifier)).await
    }

    /// Build the application over any store and notifier.
    pub async fn build_with_store(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn BillNotifier>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let schedule_interval = match config.billing.schedule_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let service = BillingService::new(store, notifier, config.billing.clone());

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Water billing listener bound");

        Ok(Self {
            http_port,
            http_listener,
            service,
            schedule_interval,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn service(&self) -> &BillingService {
        &self.service
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            store: Arc::clone(self.service.store()),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(health_state);

        if let Some(every) = self.schedule_interval {
            tokio::spawn(run_scheduler(self.service.clone(), every));
        }

        tracing::info!(
            service = "water-billing",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            scheduler = self.schedule_interval.is_some(),
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, http_router)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}

/// Periodically bill every period that has ended.
async fn run_scheduler(service: BillingService, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let today = Utc::now().date_naive();
        match service.run_due_periods(today).await {
            Ok(results) if results.is_empty() => {
                tracing::debug!("No billing periods due");
            }
            Ok(results) => {
                tracing::info!(runs = results.len(), "Scheduled billing runs complete");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to list due billing periods");
            }
        }
    }
}
