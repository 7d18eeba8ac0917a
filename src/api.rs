//! HTTP API for assessment sessions

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::llm::ChatClient;
use crate::session::SessionController;
use crate::sink::TurnLog;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A session behind an async mutex; held for the whole of an exchange
pub type SharedSession = Arc<Mutex<SessionController<Arc<dyn ChatClient>>>>;

/// Bounds on the in-memory session table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Sessions untouched for this long are dropped
    pub idle_ttl: Duration,
    /// New sessions are refused once this many are live
    pub max_sessions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(3600),
            max_sessions: 1000,
        }
    }
}

struct SessionEntry {
    session: SharedSession,
    last_touched: Instant,
}

impl SessionEntry {
    /// Idle past `ttl` and not in the middle of an exchange
    fn is_evictable(&self, ttl: Duration) -> bool {
        self.last_touched.elapsed() >= ttl && self.session.try_lock().is_ok()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    client: Arc<dyn ChatClient>,
    log: TurnLog,
    limits: SessionLimits,
}

impl AppState {
    pub fn new(client: Arc<dyn ChatClient>, log: TurnLog, limits: SessionLimits) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            client,
            log,
            limits,
        }
    }

    /// Register a fresh, not-started session and return its id.
    /// Returns `None` when the table is full even after evicting idle sessions.
    pub async fn create_session(&self) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.limits.max_sessions {
            evict_idle(&mut sessions, self.limits.idle_ttl);
            if sessions.len() >= self.limits.max_sessions {
                tracing::warn!(live = sessions.len(), "Session limit reached");
                return None;
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let controller = SessionController::new(id.clone(), self.client.clone(), self.log.clone());
        sessions.insert(
            id.clone(),
            SessionEntry {
                session: Arc::new(Mutex::new(controller)),
                last_touched: Instant::now(),
            },
        );
        tracing::info!(session_id = %id, "Session created");
        Some(id)
    }

    /// Look up a session and mark it as used
    pub async fn session(&self, id: &str) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_touched = Instant::now();
        Some(entry.session.clone())
    }

    /// Remove a session; an exchange already running on it still completes
    pub async fn remove_session(&self, id: &str) -> Option<SharedSession> {
        let entry = self.sessions.write().await.remove(id)?;
        tracing::info!(session_id = %id, "Session removed");
        Some(entry.session)
    }

    /// Drop every idle session and return how many went
    pub async fn evict_idle(&self) -> usize {
        evict_idle(&mut *self.sessions.write().await, self.limits.idle_ttl)
    }

    /// Sweep idle sessions every `every` until the handle is aborted
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = state.evict_idle().await;
                if evicted > 0 {
                    tracing::info!(evicted, "Swept idle sessions");
                }
            }
        })
    }
}

fn evict_idle(sessions: &mut HashMap<String, SessionEntry>, ttl: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|id, entry| {
        let evict = entry.is_evictable(ttl);
        if evict {
            tracing::info!(session_id = %id, "Evicting idle session");
        }
        !evict
    });
    before - sessions.len()
}
