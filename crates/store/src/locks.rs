// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exclusive, all-or-nothing leases on sets of file paths.
//!
//! Grants carry a TTL and are renewed by heartbeat; a background reaper
//! marks expired grants released so a crashed worker can never pin a
//! file forever. Grants are kept in the map after release so release is
//! idempotent.

use fortify_core::Clock;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default lease lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Reaper cadence.
pub const REAPER_TICK: Duration = Duration::from_secs(30);

pub type GrantId = Uuid;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("directories cannot be locked: {path}")]
    OverLock { path: String },

    #[error("lock acquisition timed out after {}s for {holder}", timeout.as_secs())]
    Timeout { holder: String, timeout: Duration },
}

/// An exclusive lease over a set of canonical absolute paths.
#[derive(Debug, Clone)]
pub struct Grant {
    pub id: GrantId,
    pub holder: String,
    pub write_paths: BTreeSet<PathBuf>,
    pub acquired_at: Instant,
    pub expires_at: Instant,
    pub released: bool,
}

impl Grant {
    fn is_active(&self, now: Instant) -> bool {
        !self.released && self.expires_at > now
    }
}

/// Grants exclusive path leases; all methods are thread-safe.
pub struct LockManager<C: Clock> {
    grants: Mutex<HashMap<GrantId, Grant>>,
    ttl: Duration,
    clock: C,
}

impl<C: Clock> LockManager<C> {
    pub fn new(ttl: Duration, clock: C) -> Self {
        Self { grants: Mutex::new(HashMap::new()), ttl, clock }
    }

    /// Non-blocking acquisition. All-or-nothing: either the whole set is
    /// leased as one grant, or nothing is and `None` is returned.
    /// Directories are rejected outright.
    pub fn try_acquire(
        &self,
        holder: &str,
        write_paths: &[PathBuf],
    ) -> Result<Option<Grant>, LockError> {
        let canonical: BTreeSet<PathBuf> = write_paths
            .iter()
            .map(|p| {
                if p.is_dir() {
                    return Err(LockError::OverLock { path: p.display().to_string() });
                }
                Ok(canonical_or_input(p))
            })
            .collect::<Result<_, _>>()?;

        let now = self.clock.now();
        let mut grants = self.grants.lock();

        let conflicted = grants.values().any(|g| {
            g.is_active(now) && !g.write_paths.is_disjoint(&canonical)
        });
        if conflicted {
            return Ok(None);
        }

        let grant = Grant {
            id: Uuid::new_v4(),
            holder: holder.to_string(),
            write_paths: canonical,
            acquired_at: now,
            expires_at: now + self.ttl,
            released: false,
        };
        grants.insert(grant.id, grant.clone());
        tracing::debug!(holder, grant_id = %grant.id, paths = grant.write_paths.len(), "lock granted");
        Ok(Some(grant))
    }

    /// Poll [`Self::try_acquire`] until success or deadline.
    pub async fn acquire(
        &self,
        holder: &str,
        write_paths: &[PathBuf],
        timeout: Duration,
        interval: Duration,
    ) -> Result<Grant, LockError> {
        let deadline = self.clock.now() + timeout;
        loop {
            if let Some(grant) = self.try_acquire(holder, write_paths)? {
                return Ok(grant);
            }
            if self.clock.now() >= deadline {
                return Err(LockError::Timeout { holder: holder.to_string(), timeout });
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Idempotent release. Returns `false` only for unknown grants.
    pub fn release(&self, grant_id: GrantId) -> bool {
        let mut grants = self.grants.lock();
        match grants.get_mut(&grant_id) {
            Some(grant) => {
                if !grant.released {
                    grant.released = true;
                    tracing::debug!(grant_id = %grant_id, "lock released");
                }
                true
            }
            None => false,
        }
    }

    /// Extend the lease by the TTL. Fails for unknown or released grants.
    pub fn renew(&self, grant_id: GrantId) -> bool {
        let now = self.clock.now();
        let mut grants = self.grants.lock();
        match grants.get_mut(&grant_id) {
            Some(grant) if !grant.released => {
                grant.expires_at = now + self.ttl;
                true
            }
            _ => false,
        }
    }

    /// Active grants holding any of the given paths.
    pub fn check_conflicts(&self, paths: &[PathBuf]) -> Vec<Grant> {
        let wanted: BTreeSet<PathBuf> = paths.iter().map(|p| canonical_or_input(p)).collect();
        let now = self.clock.now();
        self.grants
            .lock()
            .values()
            .filter(|g| g.is_active(now) && !g.write_paths.is_disjoint(&wanted))
            .cloned()
            .collect()
    }

    /// All non-released, non-expired grants.
    pub fn active_grants(&self) -> Vec<Grant> {
        let now = self.clock.now();
        self.grants.lock().values().filter(|g| g.is_active(now)).cloned().collect()
    }

    /// Whether a grant is active and holds the exact canonical path.
    pub fn holds(&self, grant_id: GrantId, path: &Path) -> bool {
        let now = self.clock.now();
        self.grants
            .lock()
            .get(&grant_id)
            .map(|g| g.is_active(now) && g.write_paths.contains(path))
            .unwrap_or(false)
    }

    /// Release every grant.
    pub fn release_all(&self) {
        let mut grants = self.grants.lock();
        for grant in grants.values_mut() {
            grant.released = true;
        }
        tracing::debug!("all locks released");
    }

    /// Mark expired grants released; returns how many were reaped.
    pub fn reap_expired(&self) -> usize {
        let now = self.clock.now();
        let mut grants = self.grants.lock();
        let mut reaped = 0;
        for grant in grants.values_mut() {
            if !grant.released && grant.expires_at <= now {
                grant.released = true;
                reaped += 1;
                tracing::warn!(grant_id = %grant.id, holder = %grant.holder, "expired lock reaped");
            }
        }
        reaped
    }

    /// Background reaper; runs until the token is cancelled.
    pub fn spawn_reaper(
        self: &std::sync::Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REAPER_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        manager.reap_expired();
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

/// Canonical form where the path exists, the input otherwise. Conflict
/// detection compares these, so two spellings of one real file collide.
fn canonical_or_input(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
