//! Change events emitted to the host.

use serde::{Deserialize, Serialize};
use story_model::CardId;

/// How the presented card list changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// Became visible.
    Added,
    /// Stopped being visible.
    Removed,
    /// Stayed visible, content changed.
    Updated,
}

/// One presentation update.
///
/// `position` indexes the presented (visible, non-headless) cards of
/// `story_path`, valid when the events of a batch are applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub story_path: String,
    pub card: CardId,
    pub position: usize,
}

/// Everything one mutation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub events: Vec<ChangeEvent>,
    /// Dependencies a headless load card asked for; the host decides when to load.
    pub load_requests: Vec<String>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.load_requests.is_empty()
    }

    pub fn extend(&mut self, other: ChangeBatch) {
        self.events.extend(other.events);
        for request in other.load_requests {
            if !self.load_requests.contains(&request) {
                self.load_requests.push(request);
            }
        }
    }

    pub fn event_for(&self, card: &str) -> Option<&ChangeEvent> {
        self.events.iter().find(|e| e.card.as_str() == card)
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}

/// Host-side listener for change events.
pub trait ChangeSink {
    fn apply(&mut self, event: &ChangeEvent);
}

impl ChangeSink for Vec<ChangeEvent> {
    fn apply(&mut self, event: &ChangeEvent) {
        self.push(event.clone());
    }
}

impl ChangeSink for std::sync::mpsc::Sender<ChangeEvent> {
    fn apply(&mut self, event: &ChangeEvent) {
        if self.send(event.clone()).is_err() {
            tracing::debug!("change sink receiver dropped, event for {} discarded", event.card);
        }
    }
}
