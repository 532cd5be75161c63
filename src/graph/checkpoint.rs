//! Checkpoint storage

use crate::state_machine::{Message, State};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Node paused in `wait_user_input`, together with every answer delivered to
/// it so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub node: String,
    /// The i-th suspension point of the node receives the i-th value
    #[serde(default)]
    pub resume_values: Vec<Message>,
}

/// Snapshot of one session, written after every node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: Uuid,
    pub thread_id: String,
    pub values: State,
    /// Nodes scheduled to run next; empty once the run reached the end
    pub next: Vec<String>,
    pub step: u64,
    #[serde(default)]
    pub interrupt: Option<PendingInterrupt>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        thread_id: impl Into<String>,
        values: State,
        next: Vec<String>,
        step: u64,
        interrupt: Option<PendingInterrupt>,
    ) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            values,
            next,
            step,
            interrupt,
            created_at: Utc::now(),
        }
    }
}

/// Storage backend for checkpoints
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Latest checkpoint of a session
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, String>;

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), String>;

    /// Drop every checkpoint of a session
    async fn delete(&self, thread_id: &str) -> Result<(), String>;
}

#[async_trait]
impl<T: Checkpointer + ?Sized> Checkpointer for Arc<T> {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, String> {
        (**self).load(thread_id).await
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), String> {
        (**self).save(checkpoint).await
    }

    async fn delete(&self, thread_id: &str) -> Result<(), String> {
        (**self).delete(thread_id).await
    }
}

/// In-memory checkpointer keeping the full history of every session
#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    threads: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Checkpoint>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every checkpoint of a session, oldest first
    pub fn history(&self, thread_id: &str) -> Vec<Checkpoint> {
        self.lock().get(thread_id).cloned().unwrap_or_default()
    }

    pub fn thread_count(&self) -> usize {
        self.lock().len()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, String> {
        Ok(self
            .lock()
            .get(thread_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), String> {
        self.lock()
            .entry(checkpoint.thread_id.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), String> {
        self.lock().remove(thread_id);
        Ok(())
    }
}
