use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::generation::PriorTurn;
use crate::intent::IntentKind;

/// The `[history]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_max_turns() -> usize {
    20
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

/// One finished turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub prompt: String,
    pub intent: IntentKind,
    pub confidence: f64,
    pub created: Vec<String>,
    pub edited: Vec<String>,
    pub installed: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    /// Files this turn touched, edits first.
    pub fn files(&self) -> impl Iterator<Item = &String> {
        self.edited.iter().chain(&self.created)
    }
}

/// Bounded conversation history; the oldest turn is dropped first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<TurnRecord>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn push(&mut self, record: TurnRecord) {
        if self.turns.len() == self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(record);
    }

    /// Oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &TurnRecord> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&TurnRecord> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Up to `limit` distinct files touched recently, most recent first.
    pub fn recent_files(&self, limit: usize) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for turn in self.turns.iter().rev() {
            for path in turn.files() {
                if files.len() >= limit {
                    return files;
                }
                if !files.contains(path) {
                    files.push(path.clone());
                }
            }
        }
        files
    }

    pub fn prior_turns(&self) -> Vec<PriorTurn> {
        self.turns
            .iter()
            .map(|t| PriorTurn {
                prompt: t.prompt.clone(),
                intent: t.intent,
                files: t.files().cloned().collect(),
            })
            .collect()
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(default_max_turns())
    }
}
