//! Session tracking
//!
//! A session starts with a fresh random id and a `session_start` record and
//! ends with a `session_end` record carrying the elapsed wall-clock seconds.
//! Starting an active session or ending an inactive one does nothing. Pause
//! and resume are logged only.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::delivery::QueueHandle;
use crate::event::EventBuilder;

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    started_at: Option<Instant>,
    active: bool,
}

/// Tracks the current play session and reports its boundaries
#[derive(Debug)]
pub struct SessionTracker {
    builder: EventBuilder,
    queue: QueueHandle,
    app_name: Option<String>,
    state: Mutex<SessionState>,
}

impl SessionTracker {
    pub fn new(builder: EventBuilder, queue: QueueHandle, app_name: Option<String>) -> Self {
        Self {
            builder,
            queue,
            app_name,
            state: Mutex::new(SessionState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a session and enqueue `session_start`
    pub fn start_session(&self) {
        let mut state = self.state();
        if state.active {
            return;
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        state.session_id = Some(session_id.clone());
        state.started_at = Some(Instant::now());
        state.active = true;
        drop(state);

        self.queue.enqueue(
            self.builder
                .session_start(&session_id, self.app_name.as_deref()),
        );
        tracing::info!(session_id = %session_id, "Session started");
    }

    /// End the active session and enqueue `session_end` with its duration
    pub fn end_session(&self) {
        let mut state = self.state();
        if !state.active {
            return;
        }

        let duration = state
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let session_id = state.session_id.clone().unwrap_or_default();
        state.active = false;
        drop(state);

        self.queue
            .enqueue(self.builder.session_end(&session_id, duration));
        tracing::info!(
            session_id = %session_id,
            duration_secs = duration.as_secs_f64(),
            "Session ended"
        );
    }

    pub fn pause_session(&self) {
        if !self.is_active() {
            return;
        }
        tracing::info!("Session paused");
    }

    pub fn resume_session(&self) {
        if !self.is_active() {
            return;
        }
        tracing::info!("Session resumed");
    }

    /// Id of the current or most recent session
    pub fn session_id(&self) -> Option<String> {
        self.state().session_id.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }
}
