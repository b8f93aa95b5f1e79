//! Per-requester sliding-window request tracking.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

/// Trailing window over which requests are counted.
pub const WINDOW_MS: i64 = 180_000;

/// Result of admitting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { recent: usize },
    /// Over the configured maximum. The request was still recorded.
    Limited { recent: usize, retry_after_secs: u64 },
}

/// Tracks recent request timestamps (ms since epoch) per requester.
///
/// Every call prunes the requester's list before appending, so a stored
/// list never holds entries older than the window at the time it is read.
/// Without a maximum the gate only counts; with one it reports `Limited`.
pub struct AdmissionGate {
    windows: Mutex<HashMap<i64, Vec<i64>>>,
    window_ms: i64,
    max_requests: Option<usize>,
}

impl AdmissionGate {
    pub fn new(max_requests: Option<usize>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window_ms: WINDOW_MS,
            max_requests,
        }
    }

    /// Prune, append `now_ms`, and return how many requests are in the window.
    pub fn record_and_check(&self, requester: i64, now_ms: i64) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        self.record(&mut windows, requester, now_ms).len()
    }

    /// Record the request and decide whether it may proceed.
    pub fn admit(&self, requester: i64, now_ms: i64) -> Admission {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let timestamps = self.record(&mut windows, requester, now_ms);
        let recent = timestamps.len();
        debug!("Requester {} has {} request(s) in window", requester, recent);

        match self.max_requests {
            Some(max) if recent > max => Admission::Limited {
                recent,
                retry_after_secs: self.retry_after_secs(timestamps, max, now_ms),
            },
            _ => Admission::Allowed { recent },
        }
    }

    fn record<'a>(
        &self,
        windows: &'a mut HashMap<i64, Vec<i64>>,
        requester: i64,
        now_ms: i64,
    ) -> &'a [i64] {
        let timestamps = windows.entry(requester).or_default();
        timestamps.retain(|&t| now_ms - t < self.window_ms);
        timestamps.push(now_ms);
        timestamps
    }

    /// Seconds until a new request would be admitted, rounded up.
    ///
    /// The next request counts itself, so all but `max - 1` of the current
    /// entries must have left the window: `timestamps[len - max]` is the last
    /// one that has to expire.
    fn retry_after_secs(&self, timestamps: &[i64], max: usize, now_ms: i64) -> u64 {
        let blocking = timestamps
            .len()
            .checked_sub(max)
            .and_then(|i| timestamps.get(i))
            .copied()
            .unwrap_or(now_ms);
        let remaining_ms = (blocking + self.window_ms - now_ms).max(0);
        (remaining_ms as u64).div_ceil(1000)
    }
}

#[cfg(test)]
impl AdmissionGate {
    pub fn with_window(window_ms: i64, max_requests: Option<usize>) -> Self {
        Self {
            window_ms,
            ..Self::new(max_requests)
        }
    }

    /// Requests in the window without recording a new one.
    pub fn recent_count(&self, requester: i64, now_ms: i64) -> usize {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows
            .get(&requester)
            .map(|ts| ts.iter().filter(|&&t| now_ms - t < self.window_ms).count())
            .unwrap_or(0)
    }
}
