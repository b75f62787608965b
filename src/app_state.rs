use std::sync::Arc;

use crate::services::{queue::MessageQueue, status::StatusStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub status: Arc<dyn StatusStore>,
    pub queue: Arc<dyn MessageQueue>,
}

impl AppState {
    pub fn new(status: Arc<dyn StatusStore>, queue: Arc<dyn MessageQueue>) -> Self {
        Self { status, queue }
    }
}
