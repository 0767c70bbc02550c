//! Time-window pruning of the history.

use super::{History, Observation};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Rolling window beyond which observations are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { days: 30 }
    }
}

impl RetentionPolicy {
    pub fn new(days: i64) -> Self {
        Self { days }
    }

    /// Oldest timestamp still inside the window. Saturates at the earliest
    /// representable instant for windows reaching past it.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        ChronoDuration::try_days(self.days)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl History {
    /// Remove every observation older than the retention window.
    ///
    /// Observations at exactly the cutoff are kept. Returns the removed
    /// observations, oldest first per target, so they can be archived.
    pub fn prune(&mut self, policy: RetentionPolicy, now: DateTime<Utc>) -> Vec<Observation> {
        let cutoff = policy.cutoff(now);
        let mut removed = Vec::new();

        for series in self.series.values_mut() {
            let split = series.partition_point(|o| o.timestamp < cutoff);
            removed.extend(series.drain(..split));
        }
        self.series.retain(|_, series| !series.is_empty());

        if !removed.is_empty() {
            tracing::debug!(
                "Retention: pruned {} observations older than {}",
                removed.len(),
                cutoff
            );
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Status;
    use chrono::TimeZone;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap() + ChronoDuration::days(n)
    }

    fn daily_history(identity: &str, days: i64) -> History {
        (0..days)
            .map(|n| Observation::new(identity, Status::Up, day(n)))
            .collect()
    }

    #[test]
    fn test_prune_drops_oldest_day() {
        // 31 daily observations, day 0 through day 30.
        let mut history = daily_history("X", 31);
        let removed = history.prune(RetentionPolicy::default(), day(31));

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].timestamp, day(0));
        assert_eq!(history.observations("X").len(), 30);
        assert_eq!(history.observations("X")[0].timestamp, day(1));
    }

    #[test]
    fn test_prune_keeps_boundary() {
        let mut history = daily_history("X", 1);
        let removed = history.prune(RetentionPolicy::default(), day(30));
        assert!(removed.is_empty());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let mut history = daily_history("X", 45);
        history.merge([Observation::new("Y", Status::Down, day(40))]);
        let policy = RetentionPolicy::default();

        history.prune(policy, day(45));
        let once = history.clone();
        let removed = history.prune(policy, day(45));

        assert!(removed.is_empty());
        assert_eq!(history, once);
        assert!(history
            .chronological()
            .iter()
            .all(|o| o.timestamp >= policy.cutoff(day(45))));
    }

    #[test]
    fn test_prune_removes_fully_expired_targets() {
        let mut history = daily_history("old", 2);
        history.merge([Observation::new("fresh", Status::Up, day(60))]);

        history.prune(RetentionPolicy::default(), day(61));

        assert!(history.observations("old").is_empty());
        assert_eq!(history.observations("fresh").len(), 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_huge_window_keeps_everything() {
        let mut history = daily_history("X", 3);
        let policy = RetentionPolicy::new(i64::MAX);

        assert_eq!(policy.cutoff(day(3)), DateTime::<Utc>::MIN_UTC);
        assert!(history.prune(policy, day(3)).is_empty());
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_custom_window() {
        let mut history = daily_history("X", 10);
        history.prune(RetentionPolicy::new(7), day(10));
        assert_eq!(history.len(), 7);
    }
}
