use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEvent {
    pub item_key: String,
    pub stage: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub image_url: Option<String>,
}

/// Live progress timeline for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub key: String,
    /// Insertion order; each stage appears once.
    pub stages: Vec<StageEvent>,
    pub start_time: i64,
    pub last_update: i64,
    /// Stays `false` for records held by the ledger; completion removes the
    /// record instead of flipping it.
    pub completed: bool,
}

impl ProgressRecord {
    fn new(key: &str, now: i64) -> Self {
        Self {
            key: key.to_string(),
            stages: Vec::new(),
            start_time: now,
            last_update: now,
            completed: false,
        }
    }

    pub fn has_stage(&self, stage: &str) -> bool {
        self.stages.iter().any(|event| event.stage == stage)
    }

    pub fn latest_stage(&self) -> Option<&StageEvent> {
        self.stages.last()
    }
}

/// Finalized, cart-eligible design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedDesign {
    pub design_id: String,
    pub name: String,
    pub price: Option<f64>,
    pub image_urls: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion<'a> {
    Inserted(&'a CompletedDesign),
    AlreadyCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("item {0} is already completed")]
    AlreadyCompleted(String),
}

/// In-memory progress state: live records plus the completed-design map.
///
/// A key lives in at most one of the two maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressLedger {
    live: BTreeMap<String, ProgressRecord>,
    completed: BTreeMap<String, CompletedDesign>,
}

impl ProgressLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_or_get(&mut self, key: &str, now: i64) -> Result<&ProgressRecord, LedgerError> {
        if self.completed.contains_key(key) {
            return Err(LedgerError::AlreadyCompleted(key.to_string()));
        }
        let record = self
            .live
            .entry(key.to_string())
            .or_insert_with(|| ProgressRecord::new(key, now));
        Ok(&*record)
    }

    /// Appends a stage to an existing record. Returns `false` when there is
    /// no live record for `key` or the stage is already recorded.
    pub fn advance(&mut self, key: &str, event: StageEvent) -> bool {
        let Some(record) = self.live.get_mut(key) else {
            return false;
        };
        if record.has_stage(&event.stage) {
            return false;
        }
        record.last_update = record.last_update.max(event.timestamp);
        record.stages.push(event);
        true
    }

    /// Moves `key` into the completed map.
    ///
    /// Image references collected on the live record are folded into
    /// `payload` under their stage names; entries already in the payload
    /// win. A key without a live record is recorded directly.
    pub fn complete(&mut self, key: &str, mut payload: CompletedDesign) -> Completion<'_> {
        if self.completed.contains_key(key) {
            return Completion::AlreadyCompleted;
        }

        if let Some(record) = self.live.remove(key) {
            for event in record.stages {
                if let Some(url) = event.image_url {
                    payload.image_urls.entry(event.stage).or_insert(url);
                }
            }
        }

        Completion::Inserted(self.completed.entry(key.to_string()).or_insert(payload))
    }

    /// Seeds previously persisted designs. Live records under the same keys
    /// are dropped; existing completed entries are kept.
    pub fn restore_completed(&mut self, designs: impl IntoIterator<Item = (String, CompletedDesign)>) {
        for (key, design) in designs {
            self.live.remove(&key);
            self.completed.entry(key).or_insert(design);
        }
    }

    pub fn get(&self, key: &str) -> Option<&ProgressRecord> {
        self.live.get(key)
    }

    pub fn get_completed(&self, key: &str) -> Option<&CompletedDesign> {
        self.completed.get(key)
    }

    pub fn is_completed(&self, key: &str) -> bool {
        self.completed.contains_key(key)
    }

    pub fn has_any_completed(&self) -> bool {
        !self.completed.is_empty()
    }

    pub fn live_records(&self) -> impl Iterator<Item = &ProgressRecord> {
        self.live.values()
    }

    /// Completed designs keyed by item key, in key order.
    pub fn completed_designs(&self) -> impl Iterator<Item = (&str, &CompletedDesign)> {
        self.completed.iter().map(|(key, design)| (key.as_str(), design))
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    pub fn reset(&mut self) {
        self.live.clear();
        self.completed.clear();
    }
}
