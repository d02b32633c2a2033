//! Callback session model and health rules.
//!
//! A session is one captured, reusable request target (a continuation URL
//! good for replaying a scrape without redriving a browser) plus its
//! observed reliability over repeated replays. Health is judged from the
//! validity flag together with age and success history.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive-weighted failure count at which a session is retired.
pub const RETIRE_AFTER_FAILURES: u32 = 3;

/// Minimum recorded uses before the success ratio is trusted.
pub const MIN_SAMPLE_FOR_RATE: u32 = 5;

/// Sessions below this success ratio (at sufficient sample size) are unhealthy.
pub const HEALTHY_SUCCESS_RATE: f64 = 0.5;

/// Default maximum session age in minutes.
pub const DEFAULT_MAX_AGE_MINUTES: i64 = 60;

/// Derived lifecycle state of a session, for display only.
///
/// Never stored; recomputed from the record fields and the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Too few recorded uses to judge a success ratio.
    Fresh,
    /// Enough uses and the success ratio holds up.
    Proven,
    /// Success ratio below threshold but not yet retired.
    Degraded,
    /// Older than the maximum age; never comes back.
    Expired,
    /// Permanently deactivated after repeated failures.
    Retired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Proven => "proven",
            Self::Degraded => "degraded",
            Self::Expired => "expired",
            Self::Retired => "retired",
        }
    }
}

/// One captured callback session and its reliability history.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Database row ID; None until persisted.
    pub id: Option<i64>,
    /// The reusable request locator. Immutable after capture.
    pub target: String,
    /// Logical geographic bucket this capture was taken for (e.g. "US-West").
    pub region: String,
    /// Network egress bucket used during capture (e.g. "oxylabs_8001").
    pub source_pool: String,
    /// Capture time.
    pub created_at: DateTime<Utc>,
    /// Most recent successful use. Failures do not refresh this.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Cumulative successful uses.
    pub success_count: u32,
    /// Cumulative failures, decayed by one per success.
    pub failure_count: u32,
    /// Whether the session is still eligible for use. One-way once false.
    pub active: bool,
}

impl Session {
    /// Create a fresh session at capture time.
    pub fn new(target: String, region: String, source_pool: String) -> Self {
        Self {
            id: None,
            target,
            region,
            source_pool,
            created_at: Utc::now(),
            last_used_at: None,
            success_count: 0,
            failure_count: 0,
            active: true,
        }
    }

    /// Record one successful replay.
    ///
    /// Refreshes the recency timestamp and forgives one past failure. A
    /// single flaky failure is cancelled by the next success, while a long
    /// failure streak needs several successes to drain.
    pub fn report_success(&mut self) {
        self.success_count = self.success_count.saturating_add(1);
        self.last_used_at = Some(Utc::now());
        self.failure_count = self.failure_count.saturating_sub(1);
    }

    /// Record one failed replay.
    ///
    /// Crossing the failure threshold retires the session permanently.
    /// The recency timestamp is left alone: only confirmed-working uses
    /// count as recency.
    pub fn report_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
        if self.failure_count >= RETIRE_AFTER_FAILURES {
            self.active = false;
        }
    }

    /// Whether the session is older than `max_age`.
    pub fn is_expired(&self, max_age: Duration) -> bool {
        Utc::now() - self.created_at > max_age
    }

    /// Whether the session has outlived the default maximum age.
    pub fn is_expired_default(&self) -> bool {
        self.is_expired(Duration::minutes(DEFAULT_MAX_AGE_MINUTES))
    }

    /// Total recorded uses, successful or not.
    pub fn total_uses(&self) -> u32 {
        self.success_count.saturating_add(self.failure_count)
    }

    /// Success ratio over all recorded uses; None until any use is recorded.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.total_uses();
        if total == 0 {
            None
        } else {
            Some(f64::from(self.success_count) / f64::from(total))
        }
    }

    /// Minutes since capture.
    pub fn age_minutes(&self) -> f64 {
        let age = Utc::now() - self.created_at;
        age.num_milliseconds() as f64 / 60_000.0
    }

    /// The core reuse verdict: is this session currently safe to hand out.
    ///
    /// Retired sessions are never healthy. Expired sessions are never
    /// healthy regardless of their record. Below `MIN_SAMPLE_FOR_RATE`
    /// recorded uses the ratio carries too little signal and is ignored;
    /// the absolute failure threshold in `report_failure` is the only
    /// guard until then.
    pub fn is_healthy(&self) -> bool {
        if !self.active {
            return false;
        }
        if self.is_expired_default() {
            return false;
        }
        let total = self.total_uses();
        if total >= MIN_SAMPLE_FOR_RATE
            && f64::from(self.success_count) / f64::from(total) < HEALTHY_SUCCESS_RATE
        {
            return false;
        }
        true
    }

    /// Derived lifecycle state for status output.
    pub fn state(&self) -> SessionState {
        if !self.active {
            return SessionState::Retired;
        }
        if self.is_expired_default() {
            return SessionState::Expired;
        }
        let total = self.total_uses();
        if total < MIN_SAMPLE_FOR_RATE {
            SessionState::Fresh
        } else if f64::from(self.success_count) / f64::from(total) >= HEALTHY_SUCCESS_RATE {
            SessionState::Proven
        } else {
            SessionState::Degraded
        }
    }

    /// Serializable form with the derived health fields filled in.
    pub fn display(&self) -> SessionDisplay {
        SessionDisplay {
            id: self.id,
            target: self.target.clone(),
            region: self.region.clone(),
            source_pool: self.source_pool.clone(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            success_count: self.success_count,
            failure_count: self.failure_count,
            active: self.active,
            is_healthy: self.is_healthy(),
            age_minutes: self.age_minutes(),
        }
    }

    /// Rebuild a session from its serialized form.
    ///
    /// The derived `is_healthy` and `age_minutes` fields are discarded;
    /// they are recomputed from the stored fields on demand.
    pub fn from_display(display: SessionDisplay) -> Self {
        Self {
            id: display.id,
            target: display.target,
            region: display.region,
            source_pool: display.source_pool,
            created_at: display.created_at,
            last_used_at: display.last_used_at,
            success_count: display.success_count,
            failure_count: display.failure_count,
            active: display.active,
        }
    }
}

/// Wire form of a session.
///
/// The stored fields round-trip exactly; `is_healthy` and `age_minutes`
/// are display-time conveniences and are ignored when reading back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDisplay {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub target: String,
    pub region: String,
    pub source_pool: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub success_count: u32,
    pub failure_count: u32,
    pub active: bool,
    #[serde(default)]
    pub is_healthy: bool,
    #[serde(default)]
    pub age_minutes: f64,
}
