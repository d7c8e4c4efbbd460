// Copyright 2025 Cowboy AI, LLC.

//! Logistics engine service
//!
//! Keeps the fleet graph in sync with the event stream and answers
//! optimization requests over NATS request-reply.
//!
//! Usage: `logistics-engine [config.json]`. Environment overrides are applied
//! on top of the file; `RUST_LOG` controls log output.

use anyhow::{Context, Result};
use async_nats::Client;
use cim_domain_logistics::graph::{GraphStore, NatsKvGraphStore};
use cim_domain_logistics::optimizer::{
    HttpRoutingProvider, InFlightRequests, NatsKvRoutePlanStore, OptimizationOrchestrator,
    OptimizationRequest, OptimizationResponse, RouteGeometryResolver,
};
use cim_domain_logistics::sync::{GraphSynchronizer, JetStreamDeadLetterSink};
use cim_domain_logistics::{
    EngineConfig, EngineMetrics, FailureReason, IngressPool, JetStreamEventPublisher,
    JetStreamEventSource, LoadId, NatsClient, RequestId,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(&path)
            .with_context(|| format!("loading {}", path))?
            .with_env()?,
        None => EngineConfig::from_env()?,
    };
    config.validate()?;

    let nats = NatsClient::connect(config.nats.clone()).await?;
    let store: Arc<dyn GraphStore> =
        Arc::new(NatsKvGraphStore::new(nats.client().clone(), config.graph.clone()).await?);
    let routes = Arc::new(
        NatsKvRoutePlanStore::new(nats.client().clone(), config.route_bucket.clone()).await?,
    );

    let resolver = if config.routing.api_key.is_some() {
        let provider = HttpRoutingProvider::new(&config.routing)?;
        RouteGeometryResolver::new(Arc::new(provider), config.routing.clone())
    } else {
        warn!("No routing API key configured, using straight-line routes only");
        RouteGeometryResolver::straight_line(config.routing.clone())
    };

    let metrics = EngineMetrics::new();
    let in_flight = InFlightRequests::new();
    let publisher = Arc::new(JetStreamEventPublisher::new(
        nats.jetstream().clone(),
        &config.egress,
    ));
    let orchestrator = Arc::new(
        OptimizationOrchestrator::new(store.clone(), resolver, routes, publisher)
            .with_discovery_config(config.discovery.clone())
            .with_scoring_config(config.scoring.clone())
            .with_config(config.orchestrator.clone())
            .with_metrics(metrics.clone())
            .with_in_flight(in_flight.clone()),
    );

    let synchronizer =
        Arc::new(GraphSynchronizer::new(store).with_observer(Arc::new(in_flight)));
    let dead_letters = Arc::new(JetStreamDeadLetterSink::new(
        nats.jetstream().clone(),
        &config.egress.subject_prefix,
    ));
    let pool = Arc::new(IngressPool::start(
        &config.ingress,
        synchronizer,
        dead_letters,
        metrics.clone(),
    ));
    let source =
        JetStreamEventSource::connect(nats.jetstream(), &config.ingress, pool.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingress = tokio::spawn(source.run(shutdown_rx.clone()));
    let requests = tokio::spawn(serve_requests(
        nats.client().clone(),
        config.optimize_subject(),
        orchestrator,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    ingress.await??;
    requests.await??;
    pool.shutdown().await;

    let summary = metrics.summary().await;
    info!(?summary, "Logistics engine stopped");
    Ok(())
}

async fn serve_requests(
    client: Client,
    subject: String,
    orchestrator: Arc<OptimizationOrchestrator>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut requests = client.subscribe(subject.clone()).await?;
    info!(subject = %subject, "Serving optimization requests");

    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            next = requests.next() => match next {
                Some(message) => message,
                None => break,
            },
        };
        let Some(reply) = message.reply.clone() else {
            warn!("Optimization request without a reply subject");
            continue;
        };

        let client = client.clone();
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let response = match serde_json::from_slice::<OptimizationRequest>(&message.payload) {
                Ok(request) => orchestrator.optimize(request).await,
                Err(e) => {
                    warn!(error = %e, "Rejecting malformed optimization request");
                    OptimizationResponse::failure(
                        RequestId::generate(),
                        LoadId::new(""),
                        FailureReason::InvalidRequest,
                        0,
                        0,
                    )
                }
            };
            let payload = match serde_json::to_vec(&response) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Failed to encode optimization response");
                    return;
                }
            };
            if let Err(e) = client.publish(reply, payload.into()).await {
                warn!(error = %e, "Failed to send optimization response");
            }
        });
    }

    requests.unsubscribe().await.ok();
    Ok(())
}
