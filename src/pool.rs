//! Session pool coordination.
//!
//! One `SessionPool` owns the session store for a deployment and decides
//! which session a caller gets next. It is an explicit handle passed to
//! whoever needs it, not a process-wide registry. Checkout hands out the
//! least recently used healthy session so load spreads across captures,
//! and a region running low raises a refresh request for the capture side.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::Session;
use crate::repository::{Result, SessionRepository, StoreStats};

/// Healthy sessions a region should hold before checkout stops asking
/// for reinforcements.
pub const DEFAULT_MIN_PER_REGION: usize = 2;

/// Why the pool is asking for fresh captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// The region's healthy count dropped to or below the minimum.
    LowWatermark,
    /// A session crossed the failure threshold and was retired.
    Retirement,
}

/// A request for the capture side to top up one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub region: String,
    pub reason: RefreshReason,
}

/// Health summary for one region.
#[derive(Debug, Clone, Serialize)]
pub struct RegionStatus {
    pub region: String,
    pub healthy: usize,
    pub active: u32,
    pub total: u32,
    /// Whether the region holds at least the minimum healthy sessions.
    pub ready: bool,
}

/// Snapshot of the whole pool for status output.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub regions: Vec<RegionStatus>,
    pub store: StoreStats,
}

/// Coordinator owning the session store.
pub struct SessionPool {
    repo: SessionRepository,
    min_per_region: usize,
    refresh_tx: Option<mpsc::UnboundedSender<RefreshRequest>>,
}

impl SessionPool {
    pub fn new(repo: SessionRepository, min_per_region: usize) -> Self {
        Self {
            repo,
            min_per_region,
            refresh_tx: None,
        }
    }

    /// Register the channel that receives refresh requests.
    pub fn set_refresh_notifier(&mut self, tx: mpsc::UnboundedSender<RefreshRequest>) {
        self.refresh_tx = Some(tx);
    }

    /// Access the underlying store.
    pub fn repository(&self) -> &SessionRepository {
        &self.repo
    }

    /// Hand out the least recently used healthy session for a region.
    ///
    /// Never-used sessions go first, then the longest-idle one. Returns
    /// `None` when the region has no healthy session; a refresh request is
    /// raised both then and when the healthy count sits at the minimum.
    pub fn checkout(&self, region: &str) -> Result<Option<Session>> {
        let mut healthy = self.repo.healthy(Some(region))?;

        if healthy.is_empty() {
            warn!("no healthy sessions for region {region}");
            self.request_refresh(region, RefreshReason::LowWatermark);
            return Ok(None);
        }
        if healthy.len() <= self.min_per_region {
            debug!(
                "region {region} down to {} healthy sessions, requesting refresh",
                healthy.len()
            );
            self.request_refresh(region, RefreshReason::LowWatermark);
        }

        healthy.sort_by_key(|s| s.last_used_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH));
        Ok(healthy.into_iter().next())
    }

    /// Record a successful replay and persist the session.
    pub fn report_success(&self, session: &mut Session) -> Result<()> {
        session.report_success();
        self.repo.update(session)?;
        debug!(
            "session {:?} success ({} ok / {} failed)",
            session.id, session.success_count, session.failure_count
        );
        Ok(())
    }

    /// Record a failed replay and persist the session.
    ///
    /// A session retired by this failure raises a refresh request for its
    /// region.
    pub fn report_failure(&self, session: &mut Session) -> Result<()> {
        let was_active = session.active;
        session.report_failure();
        self.repo.update(session)?;

        if was_active && !session.active {
            info!(
                "session {:?} retired after {} failures (region {})",
                session.id, session.failure_count, session.region
            );
            self.request_refresh(&session.region, RefreshReason::Retirement);
        } else {
            debug!(
                "session {:?} failure ({} ok / {} failed)",
                session.id, session.success_count, session.failure_count
            );
        }
        Ok(())
    }

    /// Healthy sessions currently available for a region.
    pub fn healthy_count(&self, region: &str) -> Result<usize> {
        Ok(self.repo.healthy(Some(region))?.len())
    }

    /// Whether a region holds at least the minimum healthy sessions.
    pub fn is_region_ready(&self, region: &str) -> Result<bool> {
        Ok(self.healthy_count(region)? >= self.min_per_region)
    }

    /// Retire rows that are still flagged active but no longer healthy.
    ///
    /// Expiry is a wall-clock judgment, so rows age into this state without
    /// any write happening. Returns how many rows were retired.
    pub fn cleanup(&self) -> Result<usize> {
        let mut retired = 0;
        for session in self.repo.list(None, false)? {
            if !session.is_healthy() {
                if let Some(id) = session.id {
                    if self.repo.retire(id)? {
                        info!(
                            "retired session {id} (region {}, state {})",
                            session.region,
                            session.state().as_str()
                        );
                        retired += 1;
                    }
                }
            }
        }
        Ok(retired)
    }

    /// Snapshot per-region health and store aggregates.
    pub fn status(&self) -> Result<PoolStatus> {
        let store = self.repo.stats()?;
        let mut regions = Vec::with_capacity(store.regions.len());
        for counts in &store.regions {
            let healthy = self.repo.healthy(Some(&counts.region))?.len();
            regions.push(RegionStatus {
                region: counts.region.clone(),
                healthy,
                active: counts.active,
                total: counts.total,
                ready: healthy >= self.min_per_region,
            });
        }
        Ok(PoolStatus { regions, store })
    }

    fn request_refresh(&self, region: &str, reason: RefreshReason) {
        let request = RefreshRequest {
            region: region.to_string(),
            reason,
        };
        match &self.refresh_tx {
            Some(tx) => {
                if tx.send(request).is_err() {
                    debug!("refresh request for {region} dropped, receiver gone");
                }
            }
            None => debug!("refresh request for {region} unserviced, no notifier registered"),
        }
    }
}
