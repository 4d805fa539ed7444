//! Stations and their FIFO task queues.
//!
//! A station's state is written by two actors: the run loop at dispatch and
//! the completion handler of its local process. Both go through the
//! per-station mutex, and so do the read-only views handed to policies.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use gantry_core::{Position, StationId, StationRecipe, Task};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationState {
    Idle,
    Busy,
    Complete,
}

impl StationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationState::Idle => "idle",
            StationState::Busy => "busy",
            StationState::Complete => "complete",
        }
    }
}

impl std::fmt::Display for StationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("station {0}: queue is empty")]
    Empty(StationId),

    #[error("station {0}: already complete")]
    Complete(StationId),

    #[error("station {0}: a local process is still running")]
    Busy(StationId),

    #[error("task for station {task_station} offered to station {station}")]
    WrongStation {
        station: StationId,
        task_station: StationId,
    },
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Ordered tasks waiting for one station. Append-only until drained.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
        }
    }

    pub fn peek(&self) -> Option<&Task> {
        self.tasks.front()
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}

#[derive(Debug)]
struct StationInner {
    queue: TaskQueue,
    state: StationState,
    etc: Option<Instant>,
    busy_since: Option<Instant>,
    busy_time: Duration,
    completed_at: Option<Instant>,
}

/// A fixed-position endpoint running one local process at a time.
#[derive(Debug)]
pub struct Station {
    pub id: StationId,
    pub position: Position,
    inner: Mutex<StationInner>,
}

impl Station {
    pub fn new(id: StationId, position: Position, tasks: Vec<Task>) -> Self {
        Self {
            id,
            position,
            inner: Mutex::new(StationInner {
                queue: TaskQueue::new(tasks),
                state: StationState::Idle,
                etc: None,
                busy_since: None,
                busy_time: Duration::ZERO,
                completed_at: None,
            }),
        }
    }

    pub fn from_recipe(recipe: &StationRecipe) -> Self {
        Self::new(recipe.id.clone(), recipe.position, recipe.tasks.clone())
    }

    fn lock(&self) -> MutexGuard<'_, StationInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Head of the queue, without removing it.
    pub fn peek(&self) -> Option<Task> {
        self.lock().queue.peek().cloned()
    }

    /// Remove and return the head of the queue.
    pub fn dequeue(&self) -> QueueResult<Task> {
        self.lock()
            .queue
            .pop()
            .ok_or_else(|| QueueError::Empty(self.id.clone()))
    }

    /// Put a task back at the tail, e.g. to retry it after a failure.
    pub fn requeue(&self, task: Task) -> QueueResult<()> {
        if task.station_id != self.id {
            return Err(QueueError::WrongStation {
                station: self.id.clone(),
                task_station: task.station_id,
            });
        }
        let mut inner = self.lock();
        if inner.state == StationState::Complete {
            return Err(QueueError::Complete(self.id.clone()));
        }
        inner.queue.push(task);
        Ok(())
    }

    /// Flip to Busy with the estimated completion time of the new process.
    pub fn mark_busy(&self, etc: Instant) -> QueueResult<()> {
        let mut inner = self.lock();
        match inner.state {
            StationState::Busy => return Err(QueueError::Busy(self.id.clone())),
            StationState::Complete => return Err(QueueError::Complete(self.id.clone())),
            StationState::Idle => {}
        }
        inner.state = StationState::Busy;
        inner.etc = Some(etc);
        inner.busy_since = Some(Instant::now());
        debug!(station = %self.id, "busy");
        Ok(())
    }

    /// Flip Busy back to Idle. No-op in any other state.
    pub fn mark_idle(&self) {
        let mut inner = self.lock();
        if inner.state != StationState::Busy {
            return;
        }
        if let Some(since) = inner.busy_since.take() {
            inner.busy_time += Instant::now().saturating_duration_since(since);
        }
        inner.state = StationState::Idle;
        inner.etc = None;
        debug!(station = %self.id, "idle");
    }

    /// Mark the station Complete if it is Idle with an empty queue.
    /// Idempotent; returns whether the station is Complete afterwards.
    pub fn mark_complete_if_drained(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            StationState::Complete => true,
            StationState::Idle if inner.queue.is_empty() => {
                inner.state = StationState::Complete;
                inner.completed_at = Some(Instant::now());
                debug!(station = %self.id, "complete");
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> StationState {
        self.lock().state
    }

    pub fn is_complete(&self) -> bool {
        self.state() == StationState::Complete
    }

    pub fn etc(&self) -> Option<Instant> {
        self.lock().etc
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Time spent Busy so far, including a process still running.
    pub fn busy_time(&self) -> Duration {
        let inner = self.lock();
        let running = inner
            .busy_since
            .map(|since| Instant::now().saturating_duration_since(since))
            .unwrap_or_default();
        inner.busy_time + running
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.lock().completed_at
    }

    /// Consistent read-only copy, taken under one lock.
    pub fn view(&self, index: usize) -> StationView {
        let inner = self.lock();
        StationView {
            id: self.id.clone(),
            index,
            position: self.position,
            state: inner.state,
            etc: inner.etc,
            head: inner.queue.peek().cloned(),
            queue_len: inner.queue.len(),
        }
    }
}

/// What a scheduling policy may know about a station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationView {
    pub id: StationId,
    /// Position of the station in the fixed scan order.
    pub index: usize,
    pub position: Position,
    pub state: StationState,
    pub etc: Option<Instant>,
    pub head: Option<Task>,
    pub queue_len: usize,
}

impl StationView {
    /// Idle with work waiting.
    pub fn is_ready(&self) -> bool {
        self.state == StationState::Idle && self.head.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.state == StationState::Busy
    }

    pub fn is_complete(&self) -> bool {
        self.state == StationState::Complete
    }
}
