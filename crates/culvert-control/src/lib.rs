//! # culvert-control
//!
//! Mutual-exclusion arbiter deciding which actor may issue movement
//! commands: the direct operator (`"android"`) or a voice-triggered macro
//! (`"voice"`). Ownership carries a numeric priority and a TTL; expiry is
//! lazy — a stale owner is only displaced when a later acquire, renew, or
//! release observes that the TTL has passed. No background sweeper exists
//! or is needed.

#![deny(unsafe_code)]

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<String>,
    priority: i32,
    until: Option<Instant>,
}

impl LockState {
    fn expired(&self, now: Instant) -> bool {
        self.until.is_none_or(|until| now >= until)
    }

    fn clear(&mut self) {
        self.owner = None;
        self.priority = -1;
        self.until = None;
    }
}

/// Single-instance priority/TTL mutex over the movement-command channel.
///
/// All operations run under one internal critical section: the lock guards
/// a single logical resource, not one per client.
pub struct ControlLock {
    state: Mutex<LockState>,
}

impl ControlLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
        }
    }

    /// Try to take (or re-take) ownership.
    ///
    /// Succeeds if there is no owner, the current lock has expired, the
    /// requester already owns the lock, or the requester's priority is
    /// strictly greater than the current owner's. Equal priority never
    /// preempts. On success the owner, priority, and expiry are all
    /// reassigned; on failure nothing changes.
    pub fn acquire(&self, owner: &str, ttl_secs: f64, priority: i32) -> bool {
        self.acquire_at(owner, ttl_secs, priority, Instant::now())
    }

    /// Extend the expiry without a priority comparison.
    ///
    /// Same conditions as [`acquire`](Self::acquire) minus the override
    /// clause: a renewal never displaces a higher-priority holder unless
    /// the lock is expired or ownerless. The stored priority is left
    /// untouched.
    pub fn renew(&self, owner: &str, ttl_secs: f64) -> bool {
        self.renew_at(owner, ttl_secs, Instant::now())
    }

    /// Clear ownership if the lock is free, expired, or held by `owner`.
    /// Releasing someone else's active lock is a no-op.
    pub fn release(&self, owner: &str) {
        self.release_at(owner, Instant::now());
    }

    /// Read-only snapshot of the current owner.
    ///
    /// Reports the stored owner even if the TTL has lapsed; expiry is only
    /// ever acted on by acquire/renew/release.
    pub fn current_owner(&self) -> Option<String> {
        self.state.lock().owner.clone()
    }

    fn acquire_at(&self, owner: &str, ttl_secs: f64, priority: i32, now: Instant) -> bool {
        let mut state = self.state.lock();
        let grant = state.owner.is_none()
            || state.expired(now)
            || priority > state.priority
            || state.owner.as_deref() == Some(owner);
        if grant {
            state.owner = Some(owner.to_string());
            state.priority = priority;
            state.until = Some(now + Duration::from_secs_f64(ttl_secs));
            debug!(owner, priority, ttl_secs, "control lock acquired");
        }
        grant
    }

    fn renew_at(&self, owner: &str, ttl_secs: f64, now: Instant) -> bool {
        let mut state = self.state.lock();
        let grant = state.owner.is_none()
            || state.expired(now)
            || state.owner.as_deref() == Some(owner);
        if grant {
            state.owner = Some(owner.to_string());
            state.until = Some(now + Duration::from_secs_f64(ttl_secs));
        }
        grant
    }

    fn release_at(&self, owner: &str, now: Instant) {
        let mut state = self.state.lock();
        if state.owner.is_none() || state.expired(now) || state.owner.as_deref() == Some(owner) {
            state.clear();
            debug!(owner, "control lock released");
        }
    }
}

impl Default for ControlLock {
    fn default() -> Self {
        Self::new()
    }
}
