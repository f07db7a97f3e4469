// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Least-loaded endpoint selection across the configured remote models
//!
//! Each endpoint has an in-flight counter guarded by one mutex. Selection and
//! the increment happen under the same lock, and every selection hands back an
//! [`EndpointLease`] whose drop performs the matching decrement.
//!
//! When every endpoint is at its cap the selector sleeps with a doubling delay
//! and tries again. After the configured number of attempts it falls back to
//! plain round robin and dispatches anyway, so a stuck endpoint can never
//! deadlock the worker pool. That fallback is the only path that can push an
//! endpoint past its cap.
//!
//! With round robin off, or a single endpoint, the primary is the only
//! candidate; it still waits for a free slot under the cap.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RemoteConfig;

#[derive(Debug, Clone)]
pub struct BalancerSettings {
    /// In-flight cap per endpoint
    pub cap: usize,
    pub round_robin: bool,
    /// First saturation wait; doubles on every further attempt
    pub base_delay: Duration,
    /// Ceiling for the doubling delay
    pub max_delay: Duration,
    /// Saturation retries before the round-robin escape valve
    pub attempts: u32,
}

impl BalancerSettings {
    pub fn from_config(remote: &RemoteConfig) -> Self {
        Self {
            cap: remote.endpoint_cap.max(1),
            round_robin: remote.round_robin,
            base_delay: Duration::from_millis(remote.backoff.base_delay_ms),
            max_delay: Duration::from_millis(remote.backoff.max_delay_ms),
            attempts: remote.backoff.attempts,
        }
    }
}

#[derive(Debug)]
struct BalancerState {
    active: Vec<usize>,
    peak: Vec<usize>,
    cursor: usize,
}

/// Tracks active requests per endpoint and picks where the next one goes
#[derive(Debug)]
pub struct EndpointBalancer {
    endpoints: Vec<String>,
    settings: BalancerSettings,
    state: Mutex<BalancerState>,
}

/// A claimed endpoint slot; dropping it releases the slot exactly once
#[derive(Debug)]
pub struct EndpointLease<'a> {
    balancer: &'a EndpointBalancer,
    index: usize,
}

impl EndpointLease<'_> {
    pub fn endpoint(&self) -> &str {
        &self.balancer.endpoints[self.index]
    }
}

impl Drop for EndpointLease<'_> {
    fn drop(&mut self) {
        self.balancer.release_index(self.index);
    }
}

impl EndpointBalancer {
    /// `endpoints` must not be empty; the first one is the primary
    pub fn new(endpoints: Vec<String>, settings: BalancerSettings) -> Self {
        assert!(!endpoints.is_empty(), "balancer needs at least one endpoint");
        let n = endpoints.len();
        Self {
            endpoints,
            settings,
            state: Mutex::new(BalancerState {
                active: vec![0; n],
                peak: vec![0; n],
                cursor: 0,
            }),
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn lock_state(&self) -> MutexGuard<'_, BalancerState> {
        // Counters stay consistent even if a holder panicked mid-call: every
        // mutation is a single increment or decrement.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pick an endpoint and claim a slot on it
    pub async fn acquire(&self) -> EndpointLease<'_> {
        let index = self.select_index().await;
        EndpointLease { balancer: self, index }
    }

    /// Pick an endpoint and claim a slot; the caller must [`Self::release`] it
    pub async fn select_endpoint(&self) -> String {
        let index = self.select_index().await;
        self.endpoints[index].clone()
    }

    /// Endpoints eligible for selection: a prefix of the list
    fn candidates(&self) -> usize {
        if self.settings.round_robin {
            self.endpoints.len()
        } else {
            1
        }
    }

    async fn select_index(&self) -> usize {
        let candidates = self.candidates();
        let mut delay = self.settings.base_delay;
        for attempt in 0..=self.settings.attempts {
            if let Some(index) = self.try_least_loaded(candidates) {
                return index;
            }
            if attempt == self.settings.attempts {
                break;
            }
            debug!(
                "All {} endpoints at cap {}, waiting {:?} (attempt {}/{})",
                candidates,
                self.settings.cap,
                delay,
                attempt + 1,
                self.settings.attempts
            );
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2).min(self.settings.max_delay);
        }

        let mut state = self.lock_state();
        let index = state.cursor % candidates;
        state.cursor = (index + 1) % candidates;
        claim(&mut state, index);
        warn!(
            "Endpoints still saturated after {} waits; dispatching to {} over its cap ({} active)",
            self.settings.attempts, self.endpoints[index], state.active[index]
        );
        index
    }

    /// Lowest active count below the cap, ties going to the earlier endpoint
    fn try_least_loaded(&self, candidates: usize) -> Option<usize> {
        let mut state = self.lock_state();
        let index = state.active[..candidates]
            .iter()
            .enumerate()
            .filter(|(_, count)| **count < self.settings.cap)
            .min_by_key(|(i, count)| (**count, *i))
            .map(|(i, _)| i)?;
        claim(&mut state, index);
        Some(index)
    }

    /// Give back a slot taken by [`Self::select_endpoint`]. Unknown names are ignored.
    pub fn release(&self, endpoint: &str) {
        match self.endpoints.iter().position(|e| e == endpoint) {
            Some(index) => self.release_index(index),
            None => warn!("Release for unknown endpoint {}", endpoint),
        }
    }

    fn release_index(&self, index: usize) {
        let mut state = self.lock_state();
        if state.active[index] == 0 {
            warn!("Double release on endpoint {}", self.endpoints[index]);
            return;
        }
        state.active[index] -= 1;
    }

    pub fn active(&self, endpoint: &str) -> usize {
        let state = self.lock_state();
        self.endpoints
            .iter()
            .position(|e| e == endpoint)
            .map(|i| state.active[i])
            .unwrap_or(0)
    }

    /// Highest in-flight count any endpoint has reached
    pub fn peak_active(&self) -> usize {
        self.lock_state().peak.iter().copied().max().unwrap_or(0)
    }

    /// `(endpoint, active)` pairs in configured order
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let state = self.lock_state();
        self.endpoints
            .iter()
            .cloned()
            .zip(state.active.iter().copied())
            .collect()
    }
}

fn claim(state: &mut BalancerState, index: usize) {
    state.active[index] += 1;
    if state.active[index] > state.peak[index] {
        state.peak[index] = state.active[index];
    }
}
