use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Length of one usage window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Calls attributed to one key since `window_start`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageWindow {
    pub count: u32,
    pub window_start: Instant,
}

impl UsageWindow {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= WINDOW
    }

    /// Time until this window expires, zero if already stale.
    fn remaining(&self, now: Instant) -> Duration {
        WINDOW.saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

/// Authoritative per-key usage record shared by every worker.
///
/// Entries are created once at construction; callers can only read and
/// mutate windows, always under the single ledger lock.
#[derive(Debug)]
pub struct KeyLedger {
    rpm_limit: u32,
    windows: Mutex<BTreeMap<usize, UsageWindow>>,
}

impl KeyLedger {
    pub fn new(indices: impl IntoIterator<Item = usize>, rpm_limit: u32, now: Instant) -> Self {
        let windows = indices
            .into_iter()
            .map(|idx| (idx, UsageWindow::fresh(now)))
            .collect();
        Self {
            rpm_limit,
            windows: Mutex::new(windows),
        }
    }

    pub fn rpm_limit(&self) -> u32 {
        self.rpm_limit
    }

    pub fn indices(&self) -> Vec<usize> {
        self.windows.lock().keys().copied().collect()
    }

    /// True when the window is stale or still has spare capacity.
    /// Unknown indices are never usable.
    pub fn check_key_status(&self, index: usize, now: Instant) -> bool {
        let windows = self.windows.lock();
        windows
            .get(&index)
            .is_some_and(|w| has_capacity(w, self.rpm_limit, now))
    }

    /// Check and, on success, count one call against `index`.
    pub fn check_and_reserve(&self, index: usize, now: Instant) -> bool {
        let mut windows = self.windows.lock();
        reserve(&mut windows, index, self.rpm_limit, now)
    }

    /// Reserve `preferred` if it has capacity, else the first usable index of
    /// `fallback_order`. With every key saturated, returns the time until the
    /// earliest window resets. The whole search runs under one lock hold.
    pub fn reserve_any(
        &self,
        preferred: Option<usize>,
        fallback_order: &[usize],
        now: Instant,
    ) -> Result<usize, Duration> {
        let mut windows = self.windows.lock();

        if let Some(idx) = preferred {
            if reserve(&mut windows, idx, self.rpm_limit, now) {
                return Ok(idx);
            }
        }

        for &idx in fallback_order {
            if Some(idx) == preferred {
                continue;
            }
            if reserve(&mut windows, idx, self.rpm_limit, now) {
                return Ok(idx);
            }
        }

        let earliest = windows
            .values()
            .map(|w| w.remaining(now))
            .min()
            .unwrap_or(WINDOW);
        Err(earliest)
    }

    pub fn snapshot(&self, index: usize) -> Option<UsageWindow> {
        self.windows.lock().get(&index).copied()
    }
}

fn has_capacity(window: &UsageWindow, rpm_limit: u32, now: Instant) -> bool {
    window.is_stale(now) || window.count < rpm_limit
}

fn reserve(
    windows: &mut BTreeMap<usize, UsageWindow>,
    index: usize,
    rpm_limit: u32,
    now: Instant,
) -> bool {
    let Some(window) = windows.get_mut(&index) else {
        return false;
    };
    if window.is_stale(now) {
        *window = UsageWindow::fresh(now);
    }
    if window.count < rpm_limit {
        window.count += 1;
        return true;
    }
    false
}
