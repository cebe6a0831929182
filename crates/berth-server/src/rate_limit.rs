// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-credential rate limiting.
//!
//! A sliding-window limiter keyed by key id. Buckets are
//! per-credential, not per-user: two keys of the same user are limited
//! independently. Memory stays bounded by periodic cleanup of idle
//! keys.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Run cleanup every this many checks.
const CLEANUP_INTERVAL: u64 = 256;

/// Sliding-window limiter over opaque keys.
pub struct KeyRateLimiter {
    max_requests: u32,
    window: Duration,
    state: RwLock<HashMap<String, Vec<Instant>>>,
    check_count: AtomicU64,
}

impl KeyRateLimiter {
    /// A limiter allowing `max_requests` per `window` per key.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: RwLock::new(HashMap::new()),
            check_count: AtomicU64::new(0),
        }
    }

    /// Record a request for `key`; `false` means over budget.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();

        let count = self.check_count.fetch_add(1, Ordering::Relaxed);
        if count % CLEANUP_INTERVAL == CLEANUP_INTERVAL - 1 {
            self.cleanup(now);
        }

        let mut state = self.state.write().unwrap();
        let stamps = state.entry(key.to_string()).or_default();
        stamps.retain(|t| now.duration_since(*t) < self.window);
        if stamps.len() >= self.max_requests as usize {
            return false;
        }
        stamps.push(now);
        true
    }

    fn cleanup(&self, now: Instant) {
        let mut state = self.state.write().unwrap();
        state.retain(|_, stamps| {
            stamps.retain(|t| now.duration_since(*t) < self.window);
            !stamps.is_empty()
        });
    }

    /// Keys currently tracked (test observability).
    pub fn tracked_keys(&self) -> usize {
        self.state.read().unwrap().len()
    }
}

/// The three route-class budgets of the HTTP surface.
pub struct ApiLimits {
    /// Registry deployments: 5/min/key.
    pub registry_deploy: KeyRateLimiter,
    /// Git deployments: 3/min/key.
    pub git_deploy: KeyRateLimiter,
    /// Everything else: configurable, default 100/min/key.
    pub general: KeyRateLimiter,
}

impl ApiLimits {
    /// Build the standard budget set.
    pub fn new(general_limit: u32, general_window: Duration) -> Self {
        Self {
            registry_deploy: KeyRateLimiter::new(5, Duration::from_secs(60)),
            git_deploy: KeyRateLimiter::new(3, Duration::from_secs(60)),
            general: KeyRateLimiter::new(general_limit, general_window),
        }
    }
}
