//! Media references produced by capture.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of captured media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Video,
    Photo,
    Audio,
}

/// A captured clip, identified by uuid in the story's media registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaReference {
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,
    pub path: String,
    pub medium: Medium,
}

impl MediaReference {
    pub fn new(path: impl Into<String>, medium: Medium) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            path: path.into(),
            medium,
        }
    }
}
