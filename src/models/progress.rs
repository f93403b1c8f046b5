use serde::Serialize;

use super::status::WorkerStatus;

/// Below this many completions the ETA is too noisy to show.
const ETA_MIN_COMPLETED: usize = 5;

/// Operator-facing view of a running batch.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub percentage: f64,
    pub elapsed_seconds: u64,
    pub eta_seconds: Option<u64>,
    pub workers_alive: usize,
    pub workers: Vec<WorkerStatus>,
    pub keys_retired: u64,
    pub rate_limit_hits: u64,
}

/// `elapsed / completed * remaining`, once more than five listings are done.
pub fn eta_seconds(elapsed_seconds: u64, completed: usize, total: usize) -> Option<u64> {
    if completed <= ETA_MIN_COMPLETED {
        return None;
    }
    let remaining = total.saturating_sub(completed) as f64;
    let per_item = elapsed_seconds as f64 / completed as f64;
    Some((per_item * remaining) as u64)
}

pub fn percentage(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64 * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_eta_until_threshold() {
        assert_eq!(eta_seconds(100, 5, 100), None);
        assert_eq!(eta_seconds(100, 0, 100), None);
    }

    #[test]
    fn test_eta_linear_extrapolation() {
        // 60s for 6 listings -> 10s each, 94 left
        assert_eq!(eta_seconds(60, 6, 100), Some(940));
        assert_eq!(eta_seconds(60, 100, 100), Some(0));
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(0, 0), 0.0);
    }
}
