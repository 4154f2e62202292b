use crate::models::chat::{ Role, Turn };
use log::{ info, warn };
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to write history file: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Sole owner of the conversation sequence. The first turn is always the
/// system prompt; mutation happens only through `append` and `reset`.
pub struct ConversationStore {
    turns: Vec<Turn>,
    path: PathBuf,
    system_prompt: String,
}

impl ConversationStore {
    pub fn new(path: impl Into<PathBuf>, system_prompt: impl Into<String>) -> Self {
        let mut store = Self {
            turns: Vec::new(),
            path: path.into(),
            system_prompt: system_prompt.into(),
        };
        store.reset();
        store
    }

    /// Loads the conversation from the history file. A missing, empty or
    /// malformed file (not a JSON array, or first role not system) falls
    /// back to a fresh conversation instead of failing startup.
    pub fn restore(path: impl Into<PathBuf>, system_prompt: impl Into<String>) -> Self {
        let mut store = Self::new(path, system_prompt);
        let raw = match fs::read_to_string(&store.path) {
            Ok(raw) => raw,
            Err(_) => return store,
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return store;
        }
        match serde_json::from_str::<Vec<Turn>>(trimmed) {
            Ok(turns) if turns.first().map(|t| t.role == Role::System).unwrap_or(false) => {
                info!("Restored {} turns from {}", turns.len(), store.path.display());
                store.turns = turns;
            }
            Ok(_) => {
                warn!(
                    "History file {} does not start with a system turn. Starting with a fresh history.",
                    store.path.display()
                );
            }
            Err(e) => {
                warn!(
                    "History file {} is corrupted ({}). Starting with a fresh history.",
                    store.path.display(),
                    e
                );
            }
        }
        store
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Immutable copy of the current sequence, safe to read while later
    /// appends happen.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn reset(&mut self) {
        self.turns = vec![Turn::new(Role::System, self.system_prompt.clone())];
    }

    /// Rewrites the history file wholesale. Best-effort: a failure here is
    /// reported to the caller but never rolls back the in-memory sequence.
    pub fn persist(&self) -> Result<(), HistoryError> {
        let json = serde_json::to_string_pretty(&self.turns)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}
