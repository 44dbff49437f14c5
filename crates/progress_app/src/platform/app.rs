use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use progress_core::{RouterEvent, RouterEventKind, UpdateRouter};
use progress_engine::{
    authorize_on_connect, ConnectionEvent, ConnectionManager, DisconnectReason, ProgressPipeline,
};
use progress_logging::{initialize, progress_error, progress_info, progress_warn, LogDestination};

use super::config::AppConfig;
use super::persistence::{load_completed_designs, save_completed_designs};
use super::session::EnvSessionProvider;

pub async fn run_app() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    let destination = match &config.log_file {
        Some(path) => LogDestination::Both(path.clone()),
        None => LogDestination::Terminal,
    };
    initialize(destination, config.log_level);
    progress_info!("Starting progress client for {}", config.endpoint);

    let mut router = UpdateRouter::new();
    router.restore_completed(load_completed_designs(&config.state_dir));
    let mut pipeline = ProgressPipeline::new(router);
    register_presenters(&mut pipeline);

    let manager = ConnectionManager::new(config.connection.clone());
    authorize_on_connect(&manager, Arc::new(EnvSessionProvider::from_env()));
    let mut events = manager.event_stream();
    manager.initialize(config.endpoint.as_str());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(err) = signal {
                    progress_warn!("Cannot listen for shutdown signal: {}", err);
                }
                progress_info!("Shutdown requested");
                break Ok(());
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break Ok(());
                };
                if let Some(outcome) = process(&mut pipeline, event, &config.state_dir) {
                    break outcome;
                }
            }
        }
    };

    manager.disconnect();
    outcome
}

/// Handles one connection event. Returns `Some` when the client should stop.
fn process(
    pipeline: &mut ProgressPipeline,
    event: ConnectionEvent,
    state_dir: &Path,
) -> Option<anyhow::Result<()>> {
    let stop = match &event {
        ConnectionEvent::Error(err) if err.is_terminal() => {
            Some(Err(anyhow::anyhow!("live updates unavailable: {err}")))
        }
        ConnectionEvent::Disconnected {
            reason: DisconnectReason::Superseded,
        } => {
            progress_info!("Another client took over this session; exiting");
            Some(Ok(()))
        }
        _ => None,
    };

    let produced = pipeline.handle(event);
    if produced
        .iter()
        .any(|event| matches!(event, RouterEvent::DesignReady(_)))
    {
        persist(pipeline, state_dir);
    }
    stop
}

fn persist(pipeline: &ProgressPipeline, state_dir: &Path) {
    let ledger = pipeline.router().ledger();
    let designs = ledger.completed_designs().map(|(_, design)| design);
    match save_completed_designs(state_dir, designs) {
        Ok(path) => progress_info!(
            "Saved {} completed designs to {:?}",
            ledger.completed_len(),
            path
        ),
        Err(err) => progress_error!("Failed to save completed designs: {}", err),
    }
}

/// Log lines standing in for the presentation layer.
fn register_presenters(pipeline: &mut ProgressPipeline) {
    pipeline.on(RouterEventKind::StageAdvanced, |event| {
        if let RouterEvent::StageAdvanced(advanced) = event {
            progress_info!(
                "{} -> {} [{}]{}",
                advanced.key,
                advanced.label,
                advanced.color,
                advanced
                    .image_url
                    .as_deref()
                    .map(|url| format!(" {url}"))
                    .unwrap_or_default()
            );
        }
    });
    pipeline.on(RouterEventKind::DesignReady, |event| {
        if let RouterEvent::DesignReady(design) = event {
            let price = design
                .price
                .map(|price| format!("{price:.2}"))
                .unwrap_or_else(|| "n/a".to_string());
            progress_info!(
                "Design ready: {} \"{}\" price={} images={}",
                design.design_id,
                design.name,
                price,
                design.image_urls.len()
            );
        }
    });
    pipeline.on(RouterEventKind::Diagnostic, |event| {
        if let RouterEvent::Diagnostic(diagnostic) = event {
            progress_warn!("Dropped update ({:?}): {}", diagnostic.kind, diagnostic.detail);
        }
    });
}
