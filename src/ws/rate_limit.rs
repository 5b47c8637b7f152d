//! Per-connection fixed-window rate limiting.

use std::time::{Duration, Instant};

pub const WINDOW: Duration = Duration::from_secs(60);
pub const MAX_GENERAL: u32 = 50;
pub const MAX_SENSITIVE: u32 = 5;

/// Two counters over one shared window: every message consumes a general
/// slot, sheet-sync actions additionally consume a sensitive slot. The
/// window resets as a whole once it ages out.
#[derive(Debug)]
pub struct RateLimiter {
    window_start: Instant,
    general: u32,
    sensitive: u32,
}

impl RateLimiter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            general: 0,
            sensitive: 0,
        }
    }

    pub fn allow(&mut self, now: Instant, sensitive: bool) -> bool {
        if now.duration_since(self.window_start) > WINDOW {
            self.window_start = now;
            self.general = 0;
            self.sensitive = 0;
        }
        if sensitive {
            if self.sensitive >= MAX_SENSITIVE {
                return false;
            }
            self.sensitive += 1;
        } else {
            if self.general >= MAX_GENERAL {
                return false;
            }
            self.general += 1;
        }
        true
    }
}
