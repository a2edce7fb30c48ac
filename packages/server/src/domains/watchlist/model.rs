//! Watched artist model.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// An artist the watchlist re-checks for new releases on a cadence.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct WatchedArtist {
    pub artist_id: Uuid,
    pub name: String,
    /// Provider ids, e.g. `{"spotify": "0OdUWJ0sBjDrqHygGUXeCF"}`.
    #[builder(default = serde_json::Value::Null)]
    pub external_ids: serde_json::Value,
    #[builder(default = 0)]
    pub priority: i32,
    /// Re-check cadence.
    pub interval: Duration,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default, setter(strip_option))]
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Earliest instant the next check may be enqueued.
    pub next_check_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub cooldown_until: Option<DateTime<Utc>>,
    pub retry_budget_remaining: i32,
}

impl WatchedArtist {
    fn chrono_interval(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.interval.as_millis() as i64)
    }

    /// Record a check at `now` and schedule the next one. When a cooldown is
    /// in effect the next check waits for whichever is later.
    pub fn mark_checked(&mut self, now: DateTime<Utc>) {
        self.last_checked_at = Some(now);
        let scheduled = now + self.chrono_interval();
        self.next_check_at = match self.cooldown_until {
            Some(cooldown) => scheduled.max(cooldown),
            None => scheduled,
        };
    }

    /// Whether the artist is eligible for an `artist_sync` enqueue at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.next_check_at <= now
            && self.cooldown_until.map(|c| c <= now).unwrap_or(true)
    }

    /// Spotify id, when one is recorded.
    pub fn spotify_id(&self) -> Option<&str> {
        self.external_ids.get("spotify").and_then(|v| v.as_str())
    }
}

/// Result of charging a failure against an artist's retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureBudget {
    pub remaining: i32,
    /// True when the budget just ran out and a cooldown was applied.
    pub cooled_down: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist(now: DateTime<Utc>) -> WatchedArtist {
        WatchedArtist::builder()
            .artist_id(Uuid::new_v4())
            .name("Boards of Canada")
            .interval(Duration::from_secs(900))
            .next_check_at(now)
            .retry_budget_remaining(3)
            .build()
    }

    #[test]
    fn mark_checked_advances_by_interval() {
        let now = Utc::now();
        let mut a = artist(now);
        a.mark_checked(now);

        assert_eq!(a.last_checked_at, Some(now));
        assert_eq!(a.next_check_at, now + ChronoDuration::seconds(900));
    }

    #[test]
    fn cooldown_pushes_next_check_out() {
        let now = Utc::now();
        let mut a = artist(now);
        a.cooldown_until = Some(now + ChronoDuration::seconds(3600));
        a.mark_checked(now);

        assert_eq!(a.next_check_at, now + ChronoDuration::seconds(3600));
    }

    #[test]
    fn due_requires_enabled_and_no_cooldown() {
        let now = Utc::now();
        let mut a = artist(now);
        assert!(a.is_due(now));

        a.enabled = false;
        assert!(!a.is_due(now));

        a.enabled = true;
        a.cooldown_until = Some(now + ChronoDuration::seconds(60));
        assert!(!a.is_due(now));
        assert!(a.is_due(now + ChronoDuration::seconds(60)));
    }

    #[test]
    fn spotify_id_reads_external_ids() {
        let now = Utc::now();
        let mut a = artist(now);
        assert!(a.spotify_id().is_none());

        a.external_ids = serde_json::json!({"spotify": "abc123"});
        assert_eq!(a.spotify_id(), Some("abc123"));
    }
}
