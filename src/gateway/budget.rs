//! Daily Budget Guard
//!
//! Caps cumulative spend per UTC calendar day. Admission is checked against
//! what has already been committed; the actual cost of a request is
//! committed only after it succeeds. Each day has its own ledger key, so
//! spend resets implicitly at midnight UTC.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::budget as budget_constants;
use crate::gateway::clock::SharedClock;
use crate::gateway::store::{KeySpace, SharedStore, StoreError, StoreResult};
use crate::types::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetConfig {
    /// Spend allowed per UTC day
    pub daily_cap: f64,
    /// Fraction of the cap past which a warning is raised
    pub warning_ratio: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_cap: budget_constants::DAILY_CAP,
            warning_ratio: budget_constants::WARNING_RATIO,
        }
    }
}

impl BudgetConfig {
    pub fn warning_threshold(&self) -> f64 {
        self.daily_cap * self.warning_ratio
    }
}

/// Admission decision
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub spent_so_far: f64,
    pub remaining: f64,
    pub cap: f64,
    pub resets_at: DateTime<Utc>,
    /// Time left until `resets_at`, measured on the guard's clock
    pub resets_in: Duration,
}

impl BudgetCheck {
    pub fn into_result(self) -> Result<()> {
        if self.allowed {
            Ok(())
        } else {
            Err(GatewayError::BudgetExceeded {
                spent: self.spent_so_far,
                cap: self.cap,
                resets_at: self.resets_at,
                resets_in: self.resets_in,
            })
        }
    }
}

/// Effect of one committed cost on today's ledger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetCommit {
    pub spent_before: f64,
    pub spent_after: f64,
    /// This commit moved spend past the warning threshold
    pub crossed_warning: bool,
    /// This commit moved spend to or past the cap
    pub crossed_cap: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub day: NaiveDate,
    pub spent: f64,
    pub remaining: f64,
    /// Spend as a percentage of the cap
    pub percentage: f64,
    pub cap: f64,
    pub resets_at: DateTime<Utc>,
}

pub struct BudgetGuard {
    config: BudgetConfig,
    store: SharedStore,
    clock: SharedClock,
    keys: KeySpace,
}

impl BudgetGuard {
    pub fn new(config: BudgetConfig, store: SharedStore, clock: SharedClock, keys: KeySpace) -> Self {
        Self {
            config,
            store,
            clock,
            keys,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Next UTC midnight, when today's ledger stops counting
    pub fn resets_at(&self) -> DateTime<Utc> {
        next_reset(self.today())
    }

    /// Check committed spend for today against the cap.
    ///
    /// Nothing is held back for the pending request; its cost is unknown
    /// until it completes. Fails open when the ledger cannot be read.
    pub async fn check_and_reserve(&self) -> BudgetCheck {
        let now = self.clock.now();
        let resets_at = next_reset(now.date_naive());
        let resets_in = (resets_at - now).to_std().unwrap_or_default();

        let spent = match self.spent_on(now.date_naive()).await {
            Ok(spent) => spent,
            Err(err) => {
                warn!(error = %err, "Budget ledger unavailable, failing open");
                return BudgetCheck {
                    allowed: true,
                    spent_so_far: 0.0,
                    remaining: self.config.daily_cap,
                    cap: self.config.daily_cap,
                    resets_at,
                    resets_in,
                };
            }
        };

        let allowed = spent < self.config.daily_cap;
        if !allowed {
            debug!(spent, cap = self.config.daily_cap, "Daily budget exhausted");
        }

        BudgetCheck {
            allowed,
            spent_so_far: spent,
            remaining: (self.config.daily_cap - spent).max(0.0),
            cap: self.config.daily_cap,
            resets_at,
            resets_in,
        }
    }

    /// Add the measured cost of one successful request to today's ledger.
    ///
    /// Returns `None` when nothing was committed (invalid cost or store
    /// failure; the latter is logged and swallowed).
    pub async fn commit(&self, cost: f64) -> Option<BudgetCommit> {
        if !cost.is_finite() || cost < 0.0 {
            warn!(cost, "Refusing to commit invalid cost");
            return None;
        }

        match self.try_commit(cost).await {
            Ok(commit) => Some(commit),
            Err(err) => {
                warn!(cost, error = %err, "Failed to commit cost to budget ledger");
                None
            }
        }
    }

    async fn try_commit(&self, cost: f64) -> StoreResult<BudgetCommit> {
        let key = self.keys.budget_day(self.today());
        let spent_after = self.store.incr_by_float(&key, cost).await?;
        self.store
            .expire(&key, Duration::from_secs(budget_constants::LEDGER_TTL_SECS))
            .await?;

        let spent_before = spent_after - cost;
        let warning = self.config.warning_threshold();
        let commit = BudgetCommit {
            spent_before,
            spent_after,
            crossed_warning: spent_before <= warning && spent_after > warning,
            crossed_cap: spent_before < self.config.daily_cap
                && spent_after >= self.config.daily_cap,
        };

        if commit.crossed_cap {
            warn!(spent = spent_after, cap = self.config.daily_cap, "Daily budget exhausted");
        } else if commit.crossed_warning {
            info!(
                spent = spent_after,
                cap = self.config.daily_cap,
                "Daily budget passed warning threshold"
            );
        }
        debug!(cost, spent = spent_after, "Cost committed");

        Ok(commit)
    }

    pub async fn status(&self) -> StoreResult<BudgetStatus> {
        let day = self.today();
        let spent = self.spent_on(day).await?;
        let cap = self.config.daily_cap;
        let percentage = if cap > 0.0 {
            spent / cap * 100.0
        } else {
            100.0
        };

        Ok(BudgetStatus {
            day,
            spent,
            remaining: (cap - spent).max(0.0),
            percentage,
            cap,
            resets_at: next_reset(day),
        })
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    async fn spent_on(&self, day: NaiveDate) -> StoreResult<f64> {
        let key = self.keys.budget_day(day);
        match self.store.get(&key).await? {
            None => Ok(0.0),
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|e| StoreError::corrupt(key, e.to_string())),
        }
    }
}

/// Midnight UTC following `day`
fn next_reset(day: NaiveDate) -> DateTime<Utc> {
    day.succ_opt()
        .unwrap_or(day)
        .and_time(NaiveTime::MIN)
        .and_utc()
}
