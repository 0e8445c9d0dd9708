//! The rate limiter is named in spec.md as an external collaborator with no
//! prescribed algorithm — a fixed-window counter per avatar id, reset every
//! 60 seconds, grounded on the same "simple state behind a mutex" shape as
//! the rest of this crate's collaborators.

use std::collections::HashMap;

use tokio::sync::Mutex;

struct Window {
    started_at_ms: i64,
    count: u32,
}

pub struct RateLimiter {
    limit_per_minute: u32,
    windows: Mutex<HashMap<String, Window>>,
}

const WINDOW_MS: i64 = 60_000;

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self { limit_per_minute, windows: Mutex::new(HashMap::new()) }
    }

    /// Returns `true` if `avatar_id` is still within its budget for the
    /// window containing `now`, incrementing its counter as a side effect.
    pub async fn allow(&self, avatar_id: &str, now: i64) -> bool {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(avatar_id.to_string()).or_insert(Window { started_at_ms: now, count: 0 });

        if now - window.started_at_ms >= WINDOW_MS {
            window.started_at_ms = now;
            window.count = 0;
        }

        if window.count >= self.limit_per_minute {
            return false;
        }
        window.count += 1;
        true
    }
}
