//! Post decisions: change detection and the heartbeat gate

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

use crate::snapshot::ServerSnapshot;

/// Why a post is being made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostReason {
    StatusChanged,
    Heartbeat,
}

/// True when there is no previous snapshot or any field differs.
/// Player counts compare exactly: churn is what the message is for.
pub fn changed(prev: Option<&ServerSnapshot>, curr: &ServerSnapshot) -> bool {
    prev.map_or(true, |prev| prev != curr)
}

/// True when nothing was ever posted or the heartbeat interval has elapsed
pub fn due(last_posted_at: Option<DateTime<Utc>>, now: DateTime<Utc>, heartbeat: Duration) -> bool {
    let Some(posted_at) = last_posted_at else {
        return true;
    };
    match TimeDelta::from_std(heartbeat) {
        Ok(interval) => now.signed_duration_since(posted_at) >= interval,
        // Interval too large to represent: never due
        Err(_) => false,
    }
}

/// Combines both checks; a status change wins over a heartbeat
pub fn decide(
    prev: Option<&ServerSnapshot>,
    curr: &ServerSnapshot,
    last_posted_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    heartbeat: Duration,
) -> Option<PostReason> {
    if changed(prev, curr) {
        Some(PostReason::StatusChanged)
    } else if due(last_posted_at, now, heartbeat) {
        Some(PostReason::Heartbeat)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HEARTBEAT: Duration = Duration::from_secs(300);

    fn online(players: u32) -> ServerSnapshot {
        ServerSnapshot {
            reachable: true,
            player_count: players,
            capacity: 20,
            display_name: "Convoy".to_string(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_changed_is_field_exact() {
        let base = online(3);
        assert!(!changed(Some(&base), &base.clone()));
        assert!(changed(None, &base));

        let mut reachable = base.clone();
        reachable.reachable = false;
        let mut players = base.clone();
        players.player_count = 4;
        let mut capacity = base.clone();
        capacity.capacity = 21;
        let mut name = base.clone();
        name.display_name = "Convoy 2".to_string();

        for other in [reachable, players, capacity, name] {
            assert!(changed(Some(&base), &other));
            assert!(changed(Some(&other), &base));
        }
    }

    #[test]
    fn test_due_without_previous_post() {
        assert!(due(None, t0(), HEARTBEAT));
    }

    #[test]
    fn test_due_boundaries() {
        let posted = t0();
        assert!(!due(Some(posted), posted + TimeDelta::minutes(4), HEARTBEAT));
        assert!(!due(Some(posted), posted + TimeDelta::seconds(299), HEARTBEAT));
        assert!(due(Some(posted), posted + TimeDelta::seconds(300), HEARTBEAT));
        assert!(due(Some(posted), posted + TimeDelta::seconds(301), HEARTBEAT));
    }

    #[test]
    fn test_due_is_monotonic() {
        let posted = t0();
        let mut was_due = false;
        for secs in (0..900).step_by(7) {
            let now_due = due(Some(posted), posted + TimeDelta::seconds(secs), HEARTBEAT);
            assert!(!was_due || now_due, "due flipped back at {secs}s");
            was_due = now_due;
        }
        assert!(was_due);
    }

    #[test]
    fn test_clock_going_backwards_is_not_due() {
        let posted = t0();
        assert!(!due(Some(posted), posted - TimeDelta::minutes(10), HEARTBEAT));
    }

    #[test]
    fn test_decide_prefers_status_change() {
        let posted = t0();
        let late = posted + TimeDelta::minutes(10);
        assert_eq!(
            decide(Some(&online(3)), &online(4), Some(posted), late, HEARTBEAT),
            Some(PostReason::StatusChanged)
        );
        assert_eq!(
            decide(Some(&online(3)), &online(3), Some(posted), late, HEARTBEAT),
            Some(PostReason::Heartbeat)
        );
        assert_eq!(
            decide(
                Some(&online(3)),
                &online(3),
                Some(posted),
                posted + TimeDelta::seconds(10),
                HEARTBEAT
            ),
            None
        );
    }
}
