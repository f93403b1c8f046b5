use std::sync::Arc;

use crate::services::progress::ProgressBoard;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub board: Arc<ProgressBoard>,
}

impl AppState {
    pub fn new(board: Arc<ProgressBoard>) -> Self {
        Self { board }
    }
}
