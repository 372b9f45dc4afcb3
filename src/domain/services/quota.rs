#[cfg(test)]
#[path = "quota_test.rs"]
mod tests;

use chrono::NaiveDate;
use dashmap::DashMap;

use crate::domain::models::UsageSnapshot;
use crate::domain::models::UserType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaLimits {
    pub guest: u32,
    pub free: u32,
    pub premium: u32,
}

impl Default for QuotaLimits {
    fn default() -> QuotaLimits {
        return QuotaLimits {
            guest: 3,
            free: 10,
            premium: 100,
        };
    }
}

impl QuotaLimits {
    pub fn for_user_type(&self, user_type: UserType) -> u32 {
        match user_type {
            UserType::Guest => return self.guest,
            UserType::Free => return self.free,
            UserType::Premium => return self.premium,
        }
    }
}

struct DayCounter {
    day: NaiveDate,
    used: u32,
}

/// Daily request counters keyed by identity or network address.
///
/// Each key lives in one map shard, and the shard stays locked for the whole
/// check-and-increment, so concurrent requests from the same caller cannot
/// both observe a free slot.
#[derive(Default)]
pub struct QuotaLedger {
    counters: DashMap<String, DayCounter>,
    limits: QuotaLimits,
}

impl QuotaLedger {
    pub fn new(limits: QuotaLimits) -> QuotaLedger {
        return QuotaLedger {
            counters: DashMap::new(),
            limits,
        };
    }

    /// Reserves one request for `key` on `day`. Returns the usage after the
    /// reservation, or the current usage when the limit is already reached.
    pub fn check_and_increment(
        &self,
        key: &str,
        user_type: UserType,
        day: NaiveDate,
    ) -> Result<UsageSnapshot, UsageSnapshot> {
        let limit = self.limits.for_user_type(user_type);
        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert(DayCounter { day, used: 0 });

        if counter.day != day {
            counter.day = day;
            counter.used = 0;
        }

        if counter.used >= limit {
            return Err(UsageSnapshot::new(counter.used, limit, user_type));
        }

        counter.used += 1;
        return Ok(UsageSnapshot::new(counter.used, limit, user_type));
    }

    /// Gives back a reservation for a request that was rejected later on.
    pub fn refund(&self, key: &str, day: NaiveDate) {
        if let Some(mut counter) = self.counters.get_mut(key) {
            if counter.day == day && counter.used > 0 {
                counter.used -= 1;
            }
        }
    }

    /// Drops the counters of days before `day`.
    pub fn prune(&self, day: NaiveDate) {
        self.counters.retain(|_, counter| return counter.day >= day);
    }

    pub fn tracked_keys(&self) -> usize {
        return self.counters.len();
    }

    pub fn snapshot(&self, key: &str, user_type: UserType, day: NaiveDate) -> UsageSnapshot {
        let limit = self.limits.for_user_type(user_type);
        let used = self
            .counters
            .get(key)
            .filter(|counter| return counter.day == day)
            .map(|counter| return counter.used)
            .unwrap_or(0);

        return UsageSnapshot::new(used, limit, user_type);
    }
}
