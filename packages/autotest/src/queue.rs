use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use tracing::debug;

use common::{ContainerInput, ExecutionKey};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue '{0}' is empty")]
    Empty(String),

    #[error("Queue '{name}' has no free slot ({running} of {slots} in use)")]
    AtCapacity {
        name: String,
        running: usize,
        slots: usize,
    },
}

/// One priority tier: an ordered waiting list plus the executions currently
/// occupying this tier's slots.
///
/// A given `(commit_url, deliv_id)` is present at most once, waiting or
/// running, never both. Ordering is FIFO; promotions from other tiers use
/// `push_first` so earlier arrivals keep their place.
#[derive(Debug)]
pub struct JobQueue {
    name: String,
    slots: usize,
    waiting: VecDeque<ContainerInput>,
    running: HashMap<ExecutionKey, ContainerInput>,
}

impl JobQueue {
    pub fn new(name: impl Into<String>, slots: usize) -> Self {
        Self {
            name: name.into(),
            slots,
            waiting: VecDeque::new(),
            running: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of jobs waiting.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Number of jobs occupying slots.
    pub fn num_running(&self) -> usize {
        self.running.len()
    }

    /// Whether a slot is free.
    pub fn has_capacity(&self) -> bool {
        self.running.len() < self.slots
    }

    /// Whether the key is present anywhere in this queue, waiting or running.
    pub fn contains(&self, key: &ExecutionKey) -> bool {
        self.running.contains_key(key) || self.waiting.iter().any(|i| &i.key() == key)
    }

    /// Append to the tail of the waiting list. Duplicate admissions
    /// (already waiting or running here) are dropped.
    ///
    /// Returns whether the job was admitted.
    pub fn push(&mut self, input: ContainerInput) -> bool {
        let key = input.key();
        if self.contains(&key) {
            debug!(queue = %self.name, key = %key, "Duplicate admission dropped");
            return false;
        }
        self.waiting.push_back(input);
        true
    }

    /// Insert at the head of the waiting list. Used by cross-tier promotion
    /// so a job keeps its earlier arrival position.
    pub fn push_first(&mut self, input: ContainerInput) -> bool {
        let key = input.key();
        if self.contains(&key) {
            debug!(queue = %self.name, key = %key, "Duplicate head admission dropped");
            return false;
        }
        self.waiting.push_front(input);
        true
    }

    /// Remove and return the head of the waiting list.
    pub fn pop(&mut self) -> Result<ContainerInput, QueueError> {
        self.waiting
            .pop_front()
            .ok_or_else(|| QueueError::Empty(self.name.clone()))
    }

    /// Move the head of the waiting list into a slot and return it.
    pub fn schedule_next(&mut self) -> Result<ContainerInput, QueueError> {
        if !self.has_capacity() {
            return Err(QueueError::AtCapacity {
                name: self.name.clone(),
                running: self.running.len(),
                slots: self.slots,
            });
        }
        let input = self.pop()?;
        self.running.insert(input.key(), input.clone());
        Ok(input)
    }

    /// Position of a commit in the waiting list, by commit URL.
    pub fn index_of(&self, commit_url: &str) -> Option<usize> {
        self.waiting
            .iter()
            .position(|i| i.target.commit_url == commit_url)
    }

    /// Remove a commit from the waiting list (never from running).
    pub fn remove(&mut self, commit_url: &str) -> Option<ContainerInput> {
        let idx = self.index_of(commit_url)?;
        self.waiting.remove(idx)
    }

    /// Whether this execution occupies one of the queue's slots.
    pub fn is_commit_executing(&self, key: &ExecutionKey) -> bool {
        self.running.contains_key(key)
    }

    /// Free the slot held by this execution. Idempotent; returns whether a
    /// slot was actually freed.
    pub fn clear_execution(&mut self, key: &ExecutionKey) -> bool {
        self.running.remove(key).is_some()
    }
}
