// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-alarm cooldown gate
//!
//! The gate remembers when each alarm was last reported and refuses a new report until
//! the cooldown period has elapsed. The fire time is recorded only through
//! [`CooldownGate::mark_fired`], called after the event was accepted downstream, so a
//! failed report leaves the alarm eligible on the next qualifying detection.
//!
//! Suppressed attempts are counted; one log line is written every
//! `suppression_log_every` suppressions with the remaining cooldown.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info};

#[derive(Debug, Default)]
struct GateState {
    last_fire: HashMap<String, Instant>,
    suppressed: HashMap<String, u32>,
}

/// Rate limiter keyed by alarm name.
#[derive(Debug)]
pub struct CooldownGate {
    period: Mutex<Duration>,
    log_every: u32,
    state: Mutex<GateState>,
}

impl CooldownGate {
    pub fn new(period: Duration, suppression_log_every: u32) -> Self {
        Self {
            period: Mutex::new(period),
            log_every: suppression_log_every.max(1),
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn from_minutes(minutes: u64, suppression_log_every: u32) -> Self {
        Self::new(Duration::from_secs(minutes * 60), suppression_log_every)
    }

    pub fn period(&self) -> Duration {
        *self.period.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the cooldown period for subsequent checks.
    pub fn set_period(&self, period: Duration) {
        info!("Alarm cooldown period set to {} s", period.as_secs());
        *self.period.lock().unwrap_or_else(PoisonError::into_inner) = period;
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check whether `name` may be reported at `now` with the configured period.
    pub fn try_acquire(&self, name: &str, now: Instant) -> bool {
        self.try_acquire_for(name, now, self.period())
    }

    /// Check whether `name` may be reported at `now` with an explicit period.
    ///
    /// Passing does not record a fire; call [`mark_fired`](Self::mark_fired) once the
    /// report succeeded.
    pub fn try_acquire_for(&self, name: &str, now: Instant, period: Duration) -> bool {
        let mut state = self.state();
        let Some(last) = state.last_fire.get(name).copied() else {
            return true;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed >= period {
            state.suppressed.remove(name);
            return true;
        }

        let count = state.suppressed.entry(name.to_string()).or_insert(0);
        *count += 1;
        let remaining = period - elapsed;
        if *count % self.log_every == 0 {
            info!(
                "Alarm '{}' suppressed {} times, cooldown ends in {}m{:02}s",
                name,
                count,
                remaining.as_secs() / 60,
                remaining.as_secs() % 60
            );
        } else {
            debug!(
                "Alarm '{}' in cooldown, {} s remaining",
                name,
                remaining.as_secs()
            );
        }
        false
    }

    /// Record a successful report of `name` at `now`.
    pub fn mark_fired(&self, name: &str, now: Instant) {
        let mut state = self.state();
        state.last_fire.insert(name.to_string(), now);
        state.suppressed.remove(name);
    }

    pub fn last_fired(&self, name: &str) -> Option<Instant> {
        self.state().last_fire.get(name).copied()
    }

    /// Suppressions counted since the last fire or window expiry.
    pub fn suppressed_count(&self, name: &str) -> u32 {
        self.state().suppressed.get(name).copied().unwrap_or(0)
    }

    /// Remaining cooldown of `name` at `now`, `None` when it may fire.
    pub fn remaining(&self, name: &str, now: Instant) -> Option<Duration> {
        let period = self.period();
        let last = self.last_fired(name)?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < period).then(|| period - elapsed)
    }
}
