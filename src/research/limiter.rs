//! Global cap on in-flight external calls.
//!
//! Every agent and search call of a run goes through one [`CallLimiter`].
//! The limiter wraps the clients as decorators, so retries inside
//! [`crate::agent::invoke_with_retry`] acquire a fresh permit per attempt.
//!
//! Queueing for a permit is not work: a decorator carrying a [`WorkClock`]
//! stops that clock while its unit has calls waiting and none running, so a
//! per-unit budget measured on the clock only covers the unit's own work.

use crate::agent::{AgentClient, AgentOutput, AgentRequest};
use crate::error::{AgentError, SearchError};
use crate::models::Source;
use crate::search::SearchTool;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore shared by all clients of a run.
#[derive(Debug, Clone)]
pub struct CallLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl CallLimiter {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit. `None` only if the semaphore was closed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }
}

/// Elapsed time of one unit of work, minus the time it spent only queued
/// on a [`CallLimiter`]. Clones share the same clock.
#[derive(Debug, Clone)]
pub struct WorkClock {
    state: Arc<Mutex<ClockState>>,
}

#[derive(Debug)]
struct ClockState {
    queued: usize,
    running: usize,
    accumulated: Duration,
    /// Set while the clock is ticking.
    since: Option<Instant>,
}

impl ClockState {
    fn paused(&self) -> bool {
        self.queued > 0 && self.running == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Queued,
    Running,
}

impl WorkClock {
    /// A clock that starts ticking now.
    pub fn start() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                queued: 0,
                running: 0,
                accumulated: Duration::ZERO,
                since: Some(Instant::now()),
            })),
        }
    }

    /// Work time so far.
    pub fn elapsed(&self) -> Duration {
        let state = self.lock();
        state.accumulated + state.since.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Whether the unit is currently only waiting for permits.
    pub fn is_paused(&self) -> bool {
        self.lock().paused()
    }

    fn enter(&self, stage: Stage) -> StageGuard {
        self.update(|state| match stage {
            Stage::Queued => state.queued += 1,
            Stage::Running => state.running += 1,
        });
        StageGuard {
            clock: self.clone(),
            stage,
        }
    }

    fn leave(&self, stage: Stage) {
        self.update(|state| match stage {
            Stage::Queued => state.queued = state.queued.saturating_sub(1),
            Stage::Running => state.running = state.running.saturating_sub(1),
        });
    }

    fn update(&self, change: impl FnOnce(&mut ClockState)) {
        let mut state = self.lock();
        let was_paused = state.paused();
        change(&mut state);

        match (was_paused, state.paused()) {
            (false, true) => {
                if let Some(since) = state.since.take() {
                    state.accumulated += since.elapsed();
                }
            }
            (true, false) => state.since = Some(Instant::now()),
            _ => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Leaves its stage when dropped.
struct StageGuard {
    clock: WorkClock,
    stage: Stage,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        self.clock.leave(self.stage);
    }
}

/// A limiter permit, plus the running stage of the caller's clock if any.
struct CallPermit {
    _running: Option<StageGuard>,
    _permit: OwnedSemaphorePermit,
}

impl CallLimiter {
    /// Wait for a permit, keeping `clock` paused while only waiting.
    async fn acquire_on(&self, clock: Option<&WorkClock>) -> Option<CallPermit> {
        let queued = clock.map(|c| c.enter(Stage::Queued));
        let permit = self.acquire().await?;
        let running = clock.map(|c| c.enter(Stage::Running));
        drop(queued);

        Some(CallPermit {
            _running: running,
            _permit: permit,
        })
    }
}

/// [`AgentClient`] decorator holding a permit for the duration of each call.
pub struct LimitedAgent {
    inner: Arc<dyn AgentClient>,
    limiter: CallLimiter,
    clock: Option<WorkClock>,
}

impl LimitedAgent {
    pub fn new(inner: Arc<dyn AgentClient>, limiter: CallLimiter) -> Self {
        Self {
            inner,
            limiter,
            clock: None,
        }
    }

    /// Exclude permit waits of this client's calls from `clock`.
    pub fn with_clock(mut self, clock: WorkClock) -> Self {
        self.clock = Some(clock);
        self
    }
}

#[async_trait]
impl AgentClient for LimitedAgent {
    async fn invoke(&self, request: &AgentRequest, strict: bool) -> Result<AgentOutput, AgentError> {
        let _permit = self
            .limiter
            .acquire_on(self.clock.as_ref())
            .await
            .ok_or_else(|| AgentError::Unavailable("call limiter closed".to_string()))?;
        self.inner.invoke(request, strict).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// [`SearchTool`] decorator holding a permit for the duration of each call.
pub struct LimitedSearch {
    inner: Arc<dyn SearchTool>,
    limiter: CallLimiter,
    clock: Option<WorkClock>,
}

impl LimitedSearch {
    pub fn new(inner: Arc<dyn SearchTool>, limiter: CallLimiter) -> Self {
        Self {
            inner,
            limiter,
            clock: None,
        }
    }

    pub fn with_clock(mut self, clock: WorkClock) -> Self {
        self.clock = Some(clock);
        self
    }
}

#[async_trait]
impl SearchTool for LimitedSearch {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Source>, SearchError> {
        let _permit = self
            .limiter
            .acquire_on(self.clock.as_ref())
            .await
            .ok_or_else(|| SearchError::Unavailable("call limiter closed".to_string()))?;
        self.inner.search(query, top_k).await
    }
}
