//! Application State

use std::sync::Arc;

use tokio::sync::Mutex;

use relay_core::Engine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The single engine; the lock serializes turns
    pub engine: Arc<Mutex<Engine>>,

    /// Conversation messages kept after each turn
    pub history_window: usize,
}

impl AppState {
    pub fn new(engine: Engine, history_window: usize) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            history_window,
        }
    }
}
