use progress_core::{EventEmitter, HandlerId, RouterEvent, RouterEventKind, UpdateRouter};
use progress_logging::{progress_debug, progress_error, progress_info};
use tokio::sync::mpsc;

use crate::types::{ConnectionError, ConnectionEvent};

/// Single consumer of connection events: owns the router and republishes
/// its domain events to presentation listeners.
pub struct ProgressPipeline {
    router: UpdateRouter,
    listeners: EventEmitter<RouterEvent>,
}

impl ProgressPipeline {
    pub fn new(router: UpdateRouter) -> Self {
        Self {
            router,
            listeners: EventEmitter::new(),
        }
    }

    pub fn on(
        &mut self,
        kind: RouterEventKind,
        handler: impl Fn(&RouterEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.listeners.on(kind, handler)
    }

    pub fn off(&mut self, kind: RouterEventKind, id: HandlerId) -> bool {
        self.listeners.off(kind, id)
    }

    /// Routes one connection event and notifies listeners. Returns the
    /// domain events produced, in emission order.
    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<RouterEvent> {
        match event {
            ConnectionEvent::Message(message) => {
                let events = self.router.route(message);
                for event in &events {
                    self.listeners.emit(event);
                }
                events
            }
            ConnectionEvent::Connected => {
                progress_debug!("Pipeline sees connection open");
                Vec::new()
            }
            ConnectionEvent::Disconnected { reason } => {
                progress_debug!("Pipeline sees connection closed: {}", reason);
                Vec::new()
            }
            ConnectionEvent::Error(err) => {
                report_error(&err);
                Vec::new()
            }
        }
    }

    /// Drains `events` until every sender is gone.
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        progress_info!("Connection event stream ended");
    }

    pub fn router(&self) -> &UpdateRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut UpdateRouter {
        &mut self.router
    }

    /// Starts a fresh generation flow: all progress, completions and dedup
    /// history are discarded.
    pub fn reset(&mut self) {
        self.router.reset();
    }
}

fn report_error(err: &ConnectionError) {
    if err.is_terminal() {
        progress_error!("Live progress updates unavailable: {}", err);
    } else {
        progress_debug!("Recoverable connection error: {}", err);
    }
}
