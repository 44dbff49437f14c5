//! Reduces the inbound message stream into ledger mutations and domain
//! events.
//!
//! Duplicate stages, repeated completions, late stage updates and
//! connection-replaced notices are normal traffic. They are dropped with a
//! debug trace and produce no event.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use progress_logging::{progress_debug, progress_info, progress_warn};

use crate::emitter::Classified;
use crate::key::{design_key, item_key_for_file};
use crate::ledger::{CompletedDesign, Completion, ProgressLedger, StageEvent};
use crate::protocol::{DesignReady, ImageUpdate, InboundMessage};
use crate::stage::{stage_color, stage_label};

const DEFAULT_DESIGN_NAME: &str = "Custom design";

/// Source of "now" in unix milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub key: String,
    pub stage: String,
}

impl DedupKey {
    pub fn new(key: &str, stage: &str) -> Self {
        Self {
            key: key.to_string(),
            stage: stage.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageAdvanced {
    pub key: String,
    pub stage: String,
    pub label: &'static str,
    pub color: &'static str,
    pub image_url: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    MalformedFrame,
    UnrecognizedFileName,
    EmptyStage,
    EmptyDesignId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    DesignReady(CompletedDesign),
    StageAdvanced(StageAdvanced),
    /// A message was dropped because no item identity could be derived.
    Diagnostic(Diagnostic),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterEventKind {
    DesignReady,
    StageAdvanced,
    Diagnostic,
}

impl Classified for RouterEvent {
    type Kind = RouterEventKind;

    fn kind(&self) -> RouterEventKind {
        match self {
            RouterEvent::DesignReady(_) => RouterEventKind::DesignReady,
            RouterEvent::StageAdvanced(_) => RouterEventKind::StageAdvanced,
            RouterEvent::Diagnostic(_) => RouterEventKind::Diagnostic,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub routed: usize,
    pub stages_advanced: usize,
    pub designs_completed: usize,
    pub duplicates_dropped: usize,
    pub late_updates_dropped: usize,
    pub ignored: usize,
    pub diagnostics: usize,
}

/// Owns the ledger and the session dedup set.
pub struct UpdateRouter {
    ledger: ProgressLedger,
    seen: HashSet<DedupKey>,
    stats: RouterStats,
    clock: Clock,
}

impl Default for UpdateRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UpdateRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRouter")
            .field("ledger", &self.ledger)
            .field("seen", &self.seen.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl UpdateRouter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(|| chrono::Utc::now().timestamp_millis()))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            ledger: ProgressLedger::new(),
            seen: HashSet::new(),
            stats: RouterStats::default(),
            clock,
        }
    }

    /// Applies one validated message and returns the events it produced.
    pub fn route(&mut self, message: InboundMessage) -> Vec<RouterEvent> {
        self.stats.routed += 1;
        let events = match message {
            InboundMessage::DesignReady(ready) => self.route_design_ready(ready),
            InboundMessage::ImageUpdate(update) => self.route_image_update(update),
            InboundMessage::ConnectionReplaced => {
                // Connection lifecycle is the connection manager's concern.
                progress_info!("Connection replaced by a newer session; progress state kept");
                self.stats.ignored += 1;
                Vec::new()
            }
            InboundMessage::Unknown { kind } => {
                progress_debug!("Ignoring message of unknown type {:?}", kind);
                self.stats.ignored += 1;
                Vec::new()
            }
        };
        self.stats.diagnostics += events
            .iter()
            .filter(|event| matches!(event, RouterEvent::Diagnostic(_)))
            .count();
        events
    }

    /// Parses a raw text frame and routes it. Unparseable frames become a
    /// diagnostic event.
    pub fn route_frame(&mut self, text: &str) -> Vec<RouterEvent> {
        match InboundMessage::from_frame(text) {
            Ok(message) => self.route(message),
            Err(err) => {
                progress_warn!("Dropping malformed frame: {}", err);
                self.stats.diagnostics += 1;
                vec![diagnostic(DiagnosticKind::MalformedFrame, err.to_string())]
            }
        }
    }

    fn route_design_ready(&mut self, ready: DesignReady) -> Vec<RouterEvent> {
        let Some(key) = design_key(&ready.design_id) else {
            progress_warn!("design_ready without a design id");
            return vec![diagnostic(
                DiagnosticKind::EmptyDesignId,
                "design_ready carried an empty designId",
            )];
        };

        if self.ledger.is_completed(&key) {
            progress_debug!("Design {} already completed; ignoring repeat", key);
            return Vec::new();
        }

        let had_progress = self.ledger.get(&key).is_some();
        match self.ledger.complete(&key, synthesize_design(ready)) {
            Completion::Inserted(design) => {
                progress_info!(
                    "Design {} ready (key={}, tracked_progress={}, images={})",
                    design.design_id,
                    key,
                    had_progress,
                    design.image_urls.len()
                );
                self.stats.designs_completed += 1;
                vec![RouterEvent::DesignReady(design.clone())]
            }
            Completion::AlreadyCompleted => Vec::new(),
        }
    }

    fn route_image_update(&mut self, update: ImageUpdate) -> Vec<RouterEvent> {
        let Some(key) = item_key_for_file(&update.file_name) else {
            progress_warn!(
                "No item identity in file name {:?}; dropping update",
                update.file_name
            );
            return vec![diagnostic(
                DiagnosticKind::UnrecognizedFileName,
                format!("no item identity in file name {:?}", update.file_name),
            )];
        };

        let stage = update.stage.trim();
        if stage.is_empty() {
            progress_warn!("Update for {} has an empty stage; dropping", key);
            return vec![diagnostic(
                DiagnosticKind::EmptyStage,
                format!("empty stage for item {key}"),
            )];
        }

        if self.ledger.is_completed(&key) {
            progress_debug!("Late stage {} for completed item {}; dropping", stage, key);
            self.stats.late_updates_dropped += 1;
            return Vec::new();
        }

        if !self.seen.insert(DedupKey::new(&key, stage)) {
            progress_debug!("Duplicate stage {} for {}; dropping", stage, key);
            self.stats.duplicates_dropped += 1;
            return Vec::new();
        }

        let timestamp = update.timestamp.unwrap_or_else(|| (self.clock)());
        if let Err(err) = self.ledger.begin_or_get(&key, timestamp) {
            progress_warn!("Cannot track progress: {}", err);
            return Vec::new();
        }

        let image_url = update.image_url.filter(|url| !url.trim().is_empty());
        let event = StageEvent {
            item_key: key.clone(),
            stage: stage.to_string(),
            timestamp,
            image_url: image_url.clone(),
        };
        if !self.ledger.advance(&key, event) {
            return Vec::new();
        }

        self.stats.stages_advanced += 1;
        progress_debug!("Item {} advanced to {}", key, stage);
        vec![RouterEvent::StageAdvanced(StageAdvanced {
            stage: stage.to_string(),
            label: stage_label(stage),
            color: stage_color(stage),
            image_url,
            timestamp,
            key,
        })]
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    /// Seeds designs finalized in an earlier run, keyed by their design id.
    pub fn restore_completed(&mut self, designs: impl IntoIterator<Item = CompletedDesign>) {
        let keyed: Vec<(String, CompletedDesign)> = designs
            .into_iter()
            .filter_map(|design| design_key(&design.design_id).map(|key| (key, design)))
            .collect();
        progress_info!("Restoring {} completed designs", keyed.len());
        self.ledger.restore_completed(keyed);
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Discards all live, completed and dedup state for a fresh design flow.
    pub fn reset(&mut self) {
        progress_info!(
            "Resetting progress state (live={}, completed={}, seen={})",
            self.ledger.live_len(),
            self.ledger.completed_len(),
            self.seen.len()
        );
        self.ledger.reset();
        self.seen.clear();
        self.stats = RouterStats::default();
    }
}

fn diagnostic(kind: DiagnosticKind, detail: impl Into<String>) -> RouterEvent {
    RouterEvent::Diagnostic(Diagnostic {
        kind,
        detail: detail.into(),
    })
}

fn synthesize_design(ready: DesignReady) -> CompletedDesign {
    let name = ready
        .name
        .filter(|name| !name.trim().is_empty())
        .or(ready.palette_name.filter(|name| !name.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_DESIGN_NAME.to_string());

    let mut image_urls = ready.image_urls;
    for (index, url) in ready.images.into_iter().enumerate() {
        image_urls.entry(format!("image_{index}")).or_insert(url);
    }

    CompletedDesign {
        design_id: ready.design_id.trim().to_string(),
        name,
        price: ready.price,
        image_urls,
    }
}
