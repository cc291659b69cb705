/*
 * Camel K Build Operator - Operator Service
 * Copyright (C) 2025 Camel K build team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Operator Service - Kubernetes controller for `Build` and `IntegrationPlatform` CRDs
//!
//! This service:
//! - Elects a single leader per operator id
//! - Admits pending builds according to the platform's order strategy
//! - Keeps integration platforms initialized and monitored
//! - Provides health and metrics endpoints

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use controller::tasks::{
    config::ControllerConfig,
    leader::{holder_identity, lead, stop_requested, LeaderElector, LeadershipEnd},
    run_task_controller,
    scope::OperatorScope,
};
use serde_json::{json, Value};
use std::future::IntoFuture;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    config: Arc<ControllerConfig>,
    ready: Arc<AtomicBool>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    info!(
        "Starting Camel K build operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = load_controller_config().with_env_overrides();
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }
    let config = Arc::new(config);

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let ready = Arc::new(AtomicBool::new(false));
    let state = AppState {
        config: config.clone(),
        ready: ready.clone(),
    };

    // SIGTERM reaches both the HTTP server and the operator, which hands
    // its lease back before exiting
    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop.send(true);
    });

    // Leadership first, then the controllers; losing the lease stops both
    let mut operator_handle = {
        let client = client.clone();
        let config = config.clone();
        let ready = ready.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_operator(client, config, ready, shutdown).await })
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
        .with_state(state);

    let bind_address = config.server.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Operator HTTP server listening on {}", bind_address);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(stop_requested(shutdown))
        .into_future();

    let operator_result = tokio::select! {
        result = server => {
            result?;
            info!("HTTP server stopped");
            None
        }
        result = &mut operator_handle => Some(result),
    };

    let operator_result = match operator_result {
        Some(result) => result,
        None => match tokio::time::timeout(Duration::from_secs(10), operator_handle).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Operator did not stop within 10s");
                return Ok(());
            }
        },
    };

    match operator_result {
        Ok(Ok(())) => info!("Operator stopped"),
        Ok(Err(e)) => {
            error!("Operator failed: {}", e);
            return Err(e);
        }
        Err(e) => {
            error!("Operator task join error: {:?}", e);
            return Err(e.into());
        }
    }

    info!("Build operator stopped");
    Ok(())
}

async fn run_operator(
    client: kube::Client,
    config: Arc<ControllerConfig>,
    ready: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.leader_election.enabled {
        warn!("Leader election disabled, running controllers unconditionally");
        ready.store(true, Ordering::SeqCst);
        tokio::select! {
            result = run_task_controller(client, (*config).clone()) => result?,
            () = stop_requested(shutdown) => info!("Shutdown requested, stopping controllers"),
        }
        return Ok(());
    }

    let scope = OperatorScope::from_config(&config.operator);
    let elector = LeaderElector::new(
        client.clone(),
        &scope,
        holder_identity(config.operator.pod_name.as_deref()),
        &config.leader_election,
    );
    info!(holder = %elector.holder(), "Waiting for leadership");
    let mut lease = tokio::select! {
        lease = elector.acquire() => lease?,
        () = stop_requested(shutdown.clone()) => {
            info!("Shutdown requested before leadership was acquired");
            return Ok(());
        }
    };
    ready.store(true, Ordering::SeqCst);

    let end = lead(
        run_task_controller(client, (*config).clone()),
        lease.lost(),
        stop_requested(shutdown),
    )
    .await;
    ready.store(false, Ordering::SeqCst);

    if end.releases_lease() {
        if let Err(e) = lease.release().await {
            warn!("Failed to release leadership: {}", e);
        }
    }

    match end {
        LeadershipEnd::Finished(result) => {
            result?;
            Ok(())
        }
        LeadershipEnd::Shutdown => {
            info!("Shutdown requested, leadership released");
            Ok(())
        }
        LeadershipEnd::Lost => {
            error!("Leadership lost, stopping controllers");
            Err("leadership lost".into())
        }
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "build-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.ready.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "service": "build-operator",
        "operatorId": state.config.operator.id,
        "version": env!("CARGO_PKG_VERSION")
    })))
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "build-operator",
        "version": env!("CARGO_PKG_VERSION"),
        "operatorId": state.config.operator.id,
        "watchNamespace": state.config.operator.watch_namespace,
        "leader": state.ready.load(Ordering::SeqCst),
        "status": "running"
    }))
}

fn load_controller_config() -> ControllerConfig {
    let override_path = std::env::var("CONTROLLER_CONFIG_PATH").ok();
    let config_path = override_path
        .as_deref()
        .filter(|path| Path::new(path).exists())
        .unwrap_or("/config/config.yaml");

    match ControllerConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            info!("Loaded controller configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            ControllerConfig::default()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
