use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveTime, Utc};

/// A source of trigger instants for the background loops.
///
/// Injected so the loops can be driven by wall-clock timers in production
/// and invoked directly in tests.
#[async_trait]
pub trait Schedule: Send + Sync {
    /// Resolves at the next firing instant.
    async fn wait(&self);
}

/// Fires every `period`, measured from the end of the previous wait.
pub struct FixedInterval {
    period: Duration,
}

impl FixedInterval {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

#[async_trait]
impl Schedule for FixedInterval {
    async fn wait(&self) {
        tokio::time::sleep(self.period).await;
    }
}

/// Fires once per day at a fixed UTC time.
pub struct DailyAt {
    at: NaiveTime,
}

impl DailyAt {
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            now.date_naive()
                .checked_add_days(Days::new(1))
                .map(|d| d.and_time(self.at).and_utc())
                .unwrap_or(today)
        }
    }
}

#[async_trait]
impl Schedule for DailyAt {
    async fn wait(&self) {
        let now = Utc::now();
        let next = self.next_after(now);
        let sleep_for = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(sleep_for).await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn next_firing_is_later_today_when_time_has_not_passed() {
        let schedule = DailyAt::new(NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 1, 30, 0).unwrap();
        let next = schedule.next_after(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap());
    }

    #[test]
    fn next_firing_rolls_to_tomorrow_when_time_has_passed() {
        let schedule = DailyAt::new(NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap();
        let next = schedule.next_after(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 11, 2, 0, 0).unwrap());
    }
}
