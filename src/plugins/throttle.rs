//! Coarse per-client-address request throttle.
//!
//! Process-local and non-durable: every instance keeps its own windows, so this is an
//! abuse guard only. Write budgets are enforced by `quota`, never here.
//!
//! Idle clients are swept at most once per window by whichever caller records a
//! request after the window has elapsed, so the map stays bounded by recent traffic.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RequestThrottle {
    /// Request instants per client inside the current window
    requests: DashMap<IpAddr, Vec<Instant>>,
    window: Duration,
    max_requests: u32,
    last_sweep: Mutex<Instant>,
}

impl RequestThrottle {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            requests: DashMap::new(),
            window,
            max_requests,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Check if a request is allowed and record it.
    pub fn check_and_record(&self, addr: IpAddr) -> bool {
        self.check_and_record_at(addr, Instant::now())
    }

    pub fn check_and_record_at(&self, addr: IpAddr, now: Instant) -> bool {
        // Must run before the entry guard below is taken: the sweep locks every shard.
        self.sweep_if_due(now);

        let mut entry = self.requests.entry(addr).or_default();
        entry.retain(|&at| now.saturating_duration_since(at) < self.window);

        if entry.len() >= self.max_requests as usize {
            return false;
        }
        entry.push(now);
        true
    }

    /// Requests `addr` may still make inside the current window.
    pub fn remaining(&self, addr: IpAddr) -> u32 {
        self.remaining_at(addr, Instant::now())
    }

    pub fn remaining_at(&self, addr: IpAddr, now: Instant) -> u32 {
        let used = self
            .requests
            .get(&addr)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|&&at| now.saturating_duration_since(at) < self.window)
                    .count()
            })
            .unwrap_or(0);
        self.max_requests.saturating_sub(used as u32)
    }

    /// Drop clients with no request inside the window.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    pub fn cleanup_at(&self, now: Instant) {
        self.requests.retain(|_, requests| {
            requests.retain(|&at| now.saturating_duration_since(at) < self.window);
            !requests.is_empty()
        });
    }

    fn sweep_if_due(&self, now: Instant) {
        // A contended lock means another caller is sweeping right now.
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < self.window {
            return;
        }
        *last = now;
        drop(last);
        self.cleanup_at(now);
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }
}
