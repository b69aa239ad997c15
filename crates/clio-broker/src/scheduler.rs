// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! VSCode-style API slot scheduler: bounds parallel outbound LLM requests
//! and smooths request rate from observed rate-limit headers.

use std::time::{Duration, Instant};

const MIN_DELAY_BETWEEN_REQUESTS: Duration = Duration::from_millis(250);
const TARGET_QUOTA: f64 = 0.8;
const MAX_QUOTA_PENALTY: Duration = Duration::from_secs(5);
const QUOTA_DECAY_WINDOW: Duration = Duration::from_secs(60);

/// Tracks in-flight slots and the rate-limit state observed from the
/// provider's response headers.
pub struct ApiSlotScheduler {
    max_parallel: u32,
    in_flight: u32,
    last_request_at: Option<Instant>,
    retry_until: Option<Instant>,
    reset_at: Option<Instant>,
    remaining: Option<u32>,
    quota_used: f64,
    quota_observed_at: Option<Instant>,
}

/// Outcome of a slot request.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotDecision {
    Granted,
    Wait { delay: Duration, reason: String },
}

/// Response metadata fed back after a request completes, used to
/// recalibrate the rate model.
#[derive(Debug, Clone, Default)]
pub struct ReleaseInfo {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
    pub remaining: Option<u32>,
    pub reset_in_secs: Option<u64>,
    pub quota_used: Option<f64>,
}

impl ApiSlotScheduler {
    pub fn new(max_parallel: u32) -> Self {
        Self {
            max_parallel,
            in_flight: 0,
            last_request_at: None,
            retry_until: None,
            reset_at: None,
            remaining: None,
            quota_used: 0.0,
            quota_observed_at: None,
        }
    }

    /// Decide whether a slot can be granted right now.
    pub fn request(&mut self, now: Instant) -> SlotDecision {
        let delay = self.computed_delay(now);
        if self.in_flight < self.max_parallel && delay <= Duration::ZERO {
            self.in_flight += 1;
            self.last_request_at = Some(now);
            return SlotDecision::Granted;
        }
        let reason = if self.in_flight >= self.max_parallel {
            "max_parallel_in_flight".to_string()
        } else {
            "rate_smoothing".to_string()
        };
        SlotDecision::Wait { delay, reason }
    }

    /// Release a previously granted slot and recalibrate from response
    /// headers (already parsed by the caller into [`ReleaseInfo`]).
    pub fn release(&mut self, now: Instant, info: &ReleaseInfo) {
        self.in_flight = self.in_flight.saturating_sub(1);

        if info.status == 429 {
            if let Some(secs) = info.retry_after_secs {
                self.retry_until = Some(now + Duration::from_secs(secs));
            }
        }
        if let Some(remaining) = info.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(secs) = info.reset_in_secs {
            self.reset_at = Some(now + Duration::from_secs(secs));
        }
        if let Some(used) = info.quota_used {
            self.quota_used = used;
            self.quota_observed_at = Some(now);
        }
    }

    fn computed_delay(&self, now: Instant) -> Duration {
        let hard_cooldown = self
            .retry_until
            .map(|t| t.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        let abuse_limit = self
            .last_request_at
            .map(|t| MIN_DELAY_BETWEEN_REQUESTS.saturating_sub(now.saturating_duration_since(t)))
            .unwrap_or(Duration::ZERO);

        let window_empty = match (self.remaining, self.reset_at) {
            (Some(remaining), Some(reset_at)) if remaining as u32 <= self.in_flight => {
                reset_at.saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        };

        let penalty = self.quota_penalty(now);

        hard_cooldown.max(abuse_limit).max(window_empty).max(penalty)
    }

    /// Slots currently checked out, for status reporting.
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Configured concurrency ceiling, for status reporting.
    pub fn max_parallel(&self) -> u32 {
        self.max_parallel
    }

    fn quota_penalty(&self, now: Instant) -> Duration {
        if self.quota_used <= TARGET_QUOTA {
            return Duration::ZERO;
        }
        let excess = (self.quota_used - TARGET_QUOTA) / (1.0 - TARGET_QUOTA);
        let raw = MAX_QUOTA_PENALTY.mul_f64(excess.min(1.0));

        let age = self.quota_observed_at.map(|t| now.saturating_duration_since(t)).unwrap_or(Duration::ZERO);
        if age >= QUOTA_DECAY_WINDOW {
            return Duration::ZERO;
        }
        let decay = 1.0 - (age.as_secs_f64() / QUOTA_DECAY_WINDOW.as_secs_f64());
        raw.mul_f64(decay.max(0.0))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
