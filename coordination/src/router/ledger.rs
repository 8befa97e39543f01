//! Usage ledger: spend and call accounting behind the router.
//!
//! The ledger has no internal locking; [`super::CostAwareRouter`] owns it
//! behind a single mutex so the budget check and the reservation happen in
//! one critical section. Rollover is lazy: every entry point takes `now` and
//! resets counters whose period has ended.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tier::ModelTier;

/// Identifies an outstanding cost reservation.
pub type ReservationId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierUsage {
    pub calls: u64,
    pub tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    tier: ModelTier,
    estimated_cost: f64,
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub day: NaiveDate,
    /// `YYYY-MM`
    pub month: String,
    pub monthly_spend: f64,
    /// Estimated cost of calls routed but not yet recorded
    pub reserved_spend: f64,
    pub daily_premium_calls: u32,
    pub reserved_premium_calls: u32,
    pub per_tier: BTreeMap<ModelTier, TierUsage>,
    pub last_daily_reset: DateTime<Utc>,
    pub last_monthly_reset: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn total_calls(&self) -> u64 {
        self.per_tier.values().map(|u| u.calls).sum()
    }

    pub fn calls(&self, tier: ModelTier) -> u64 {
        self.per_tier.get(&tier).map(|u| u.calls).unwrap_or(0)
    }

    /// Fraction of recorded calls that went to `tier`, in [0, 1].
    pub fn share(&self, tier: ModelTier) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            0.0
        } else {
            self.calls(tier) as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct UsageLedger {
    day: NaiveDate,
    month: (i32, u32),
    monthly_spend: f64,
    daily_premium_calls: u32,
    per_tier: BTreeMap<ModelTier, TierUsage>,
    reservations: HashMap<ReservationId, Reservation>,
    next_reservation: ReservationId,
    last_daily_reset: DateTime<Utc>,
    last_monthly_reset: DateTime<Utc>,
}

impl UsageLedger {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            month: (now.year(), now.month()),
            monthly_spend: 0.0,
            daily_premium_calls: 0,
            per_tier: BTreeMap::new(),
            reservations: HashMap::new(),
            next_reservation: 1,
            last_daily_reset: now,
            last_monthly_reset: now,
        }
    }

    /// Reset the counters whose period ended before `now`. Returns true if
    /// anything was reset. Clocks that move backwards never reset.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        let mut rolled = false;
        let today = now.date_naive();
        if today > self.day {
            debug!(from = %self.day, to = %today, "Daily usage rollover");
            self.day = today;
            self.daily_premium_calls = 0;
            self.last_daily_reset = now;
            rolled = true;
        }
        let month = (now.year(), now.month());
        if month > self.month {
            debug!(year = month.0, month = month.1, "Monthly usage rollover");
            self.month = month;
            self.monthly_spend = 0.0;
            self.per_tier.clear();
            self.last_monthly_reset = now;
            rolled = true;
        }
        rolled
    }

    pub fn monthly_spend(&self) -> f64 {
        self.monthly_spend
    }

    pub fn reserved_spend(&self) -> f64 {
        self.reservations.values().map(|r| r.estimated_cost).sum()
    }

    /// Recorded spend plus outstanding reservations.
    pub fn committed_spend(&self) -> f64 {
        self.monthly_spend + self.reserved_spend()
    }

    fn reserved_premium(&self) -> u32 {
        self.reservations
            .values()
            .filter(|r| r.tier == ModelTier::Premium)
            .count() as u32
    }

    /// Premium calls recorded today plus outstanding premium reservations.
    pub fn committed_premium_calls(&self) -> u32 {
        self.daily_premium_calls + self.reserved_premium()
    }

    pub fn reserve(&mut self, tier: ModelTier, estimated_cost: f64) -> ReservationId {
        let id = self.next_reservation;
        self.next_reservation += 1;
        self.reservations.insert(
            id,
            Reservation {
                tier,
                estimated_cost: estimated_cost.max(0.0),
            },
        );
        id
    }

    /// Drop a reservation without recording usage.
    pub fn cancel(&mut self, id: ReservationId) -> bool {
        self.reservations.remove(&id).is_some()
    }

    /// Replace a reservation with the actual cost, booked against the tier
    /// that served the call. Unknown ids are ignored.
    pub fn settle(&mut self, id: ReservationId, tier: ModelTier, actual_cost: f64, tokens: u64) -> bool {
        match self.reservations.remove(&id) {
            Some(_) => {
                self.record(tier, actual_cost, tokens);
                true
            }
            None => {
                debug!(reservation = id, "Settle for unknown reservation ignored");
                false
            }
        }
    }

    /// Record a call that had no reservation.
    pub fn record(&mut self, tier: ModelTier, cost: f64, tokens: u64) {
        let cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };
        let usage = self.per_tier.entry(tier).or_default();
        usage.calls += 1;
        usage.tokens += tokens;
        usage.cost += cost;
        self.monthly_spend += cost;
        if tier == ModelTier::Premium {
            self.daily_premium_calls += 1;
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            day: self.day,
            month: format!("{:04}-{:02}", self.month.0, self.month.1),
            monthly_spend: self.monthly_spend,
            reserved_spend: self.reserved_spend(),
            daily_premium_calls: self.daily_premium_calls,
            reserved_premium_calls: self.reserved_premium(),
            per_tier: self.per_tier.clone(),
            last_daily_reset: self.last_daily_reset,
            last_monthly_reset: self.last_monthly_reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_reservation_counts_until_settled() {
        let mut ledger = UsageLedger::new(at(2026, 3, 10, 9));
        let id = ledger.reserve(ModelTier::Premium, 0.5);
        assert_eq!(ledger.committed_spend(), 0.5);
        assert_eq!(ledger.committed_premium_calls(), 1);

        assert!(ledger.settle(id, ModelTier::Premium, 0.3, 1_000));
        assert!(!ledger.settle(id, ModelTier::Premium, 0.3, 1_000));
        assert!((ledger.committed_spend() - 0.3).abs() < 1e-12);
        assert_eq!(ledger.committed_premium_calls(), 1);
        assert_eq!(ledger.snapshot().calls(ModelTier::Premium), 1);
    }

    #[test]
    fn test_cancel_releases_reservation() {
        let mut ledger = UsageLedger::new(at(2026, 3, 10, 9));
        let id = ledger.reserve(ModelTier::Cloud, 1.0);
        assert!(ledger.cancel(id));
        assert_eq!(ledger.committed_spend(), 0.0);
        assert_eq!(ledger.snapshot().total_calls(), 0);
    }

    #[test]
    fn test_daily_rollover_keeps_monthly_spend() {
        let mut ledger = UsageLedger::new(at(2026, 3, 10, 9));
        ledger.record(ModelTier::Premium, 2.0, 100);
        assert!(!ledger.roll_over(at(2026, 3, 10, 23)));
        assert!(ledger.roll_over(at(2026, 3, 11, 0)));
        assert_eq!(ledger.committed_premium_calls(), 0);
        assert_eq!(ledger.monthly_spend(), 2.0);
    }

    #[test]
    fn test_monthly_rollover_resets_spend() {
        let mut ledger = UsageLedger::new(at(2026, 3, 31, 22));
        ledger.record(ModelTier::Cloud, 5.0, 100);
        assert!(ledger.roll_over(at(2026, 4, 1, 0)));
        let snap = ledger.snapshot();
        assert_eq!(snap.monthly_spend, 0.0);
        assert_eq!(snap.total_calls(), 0);
        assert_eq!(snap.month, "2026-04");
    }

    #[test]
    fn test_backwards_clock_does_not_reset() {
        let mut ledger = UsageLedger::new(at(2026, 3, 10, 9));
        ledger.record(ModelTier::Cloud, 1.0, 10);
        assert!(!ledger.roll_over(at(2026, 2, 1, 0)));
        assert_eq!(ledger.monthly_spend(), 1.0);
    }

    #[test]
    fn test_negative_cost_is_clamped() {
        let mut ledger = UsageLedger::new(at(2026, 3, 10, 9));
        ledger.record(ModelTier::Cloud, -4.0, 10);
        ledger.record(ModelTier::Cloud, f64::NAN, 10);
        assert_eq!(ledger.monthly_spend(), 0.0);
        assert_eq!(ledger.snapshot().calls(ModelTier::Cloud), 2);
    }
}
