use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::models::progress::{eta_seconds, percentage, ProgressSnapshot};
use crate::models::status::{StatusEvent, WorkerStatus};

#[derive(Debug, Default)]
struct BoardState {
    workers: BTreeMap<usize, WorkerStatus>,
    completed: usize,
    keys_retired: u64,
    rate_limit_hits: u64,
}

/// Last known state per worker plus batch counters, read by the
/// progress endpoint and the periodic progress log.
#[derive(Debug)]
pub struct ProgressBoard {
    total: usize,
    started: Instant,
    state: RwLock<BoardState>,
}

impl ProgressBoard {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            started: Instant::now(),
            state: RwLock::new(BoardState::default()),
        }
    }

    pub fn apply(&self, event: StatusEvent) {
        let mut state = self.state.write();
        match event {
            StatusEvent::Worker(status) => {
                state.workers.insert(status.worker_id, status);
            }
            StatusEvent::KeyRetired => state.keys_retired += 1,
            StatusEvent::RateLimited => state.rate_limit_hits += 1,
        }
    }

    pub fn set_completed(&self, completed: usize) {
        self.state.write().completed = completed;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.read();
        let elapsed_seconds = self.started.elapsed().as_secs();
        ProgressSnapshot {
            total: self.total,
            completed: state.completed,
            percentage: percentage(state.completed, self.total),
            elapsed_seconds,
            eta_seconds: eta_seconds(elapsed_seconds, state.completed, self.total),
            workers_alive: state.workers.values().filter(|w| w.state.is_alive()).count(),
            workers: state.workers.values().cloned().collect(),
            keys_retired: state.keys_retired,
            rate_limit_hits: state.rate_limit_hits,
        }
    }
}

/// Fold status events into the board until every sender is gone.
///
/// Workers push without ever waiting on this task.
pub async fn drain_status(mut events: UnboundedReceiver<StatusEvent>, board: Arc<ProgressBoard>) {
    while let Some(event) = events.recv().await {
        board.apply(event);
    }
    tracing::debug!("Status channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::status::WorkerState;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn status(worker_id: usize, state: WorkerState, progress: usize) -> StatusEvent {
        StatusEvent::Worker(WorkerStatus {
            worker_id,
            state,
            current_job_id: None,
            progress,
        })
    }

    #[tokio::test]
    async fn test_last_state_wins() {
        let board = Arc::new(ProgressBoard::new(10));
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(status(1, WorkerState::Processing, 0)).unwrap();
        tx.send(status(2, WorkerState::Processing, 0)).unwrap();
        tx.send(status(1, WorkerState::Waiting, 1)).unwrap();
        tx.send(status(2, WorkerState::Finished, 3)).unwrap();
        tx.send(StatusEvent::KeyRetired).unwrap();
        tx.send(StatusEvent::RateLimited).unwrap();
        tx.send(StatusEvent::RateLimited).unwrap();
        drop(tx);

        drain_status(rx, Arc::clone(&board)).await;

        let snapshot = board.snapshot();
        assert_eq!(snapshot.workers.len(), 2);
        assert_eq!(snapshot.workers[0].state, WorkerState::Waiting);
        assert_eq!(snapshot.workers[0].progress, 1);
        assert_eq!(snapshot.workers_alive, 1);
        assert_eq!(snapshot.keys_retired, 1);
        assert_eq!(snapshot.rate_limit_hits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eta_appears_after_threshold() {
        let board = ProgressBoard::new(20);
        tokio::time::sleep(Duration::from_secs(50)).await;
        board.set_completed(5);
        assert_eq!(board.snapshot().eta_seconds, None);
        board.set_completed(10);
        let snapshot = board.snapshot();
        assert_eq!(snapshot.eta_seconds, Some(50));
        assert_eq!(snapshot.percentage, 50.0);
    }
}
