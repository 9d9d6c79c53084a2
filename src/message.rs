// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Notification payloads. The hub forwards them without interpreting them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message kinds emitted by the project and task services.
pub mod kinds {
    pub const JOIN_ACCEPTED: &str = "join_accepted";
    pub const JOIN_REJECTED: &str = "join_rejected";
    pub const TASK_UPDATED: &str = "task_updated";
    pub const ASSIGNEE_ADDED: &str = "assignee_added";
    pub const ASSIGNEE_REMOVED: &str = "assignee_removed";
    pub const COMMENT_ADDED: &str = "comment_added";
}

/// A notification as written to the wire: `{"type": .., "data": {..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: BTreeMap::new(),
        }
    }

    /// Add one data entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
