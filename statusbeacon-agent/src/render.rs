//! Status message presentation
//!
//! Pure mapping from a snapshot and a post reason to what the message shows.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::detect::PostReason;
use crate::snapshot::ServerSnapshot;

pub const COLOR_ONLINE: u32 = 0x57F287;
pub const COLOR_OFFLINE: u32 = 0xED4245;

/// Renderable content of the status message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub title: String,
    pub status_line: String,
    pub color: u32,
    /// Discord timestamp markup, e.g. `<t:1700000000:R>`
    pub timestamp_field: String,
    pub reason_footer: String,
}

pub fn build_payload(
    snapshot: &ServerSnapshot,
    reason: PostReason,
    label: &str,
    heartbeat: Duration,
    now: DateTime<Utc>,
) -> NotificationPayload {
    let title = if snapshot.display_name.trim().is_empty() {
        label.to_string()
    } else {
        snapshot.display_name.clone()
    };

    NotificationPayload {
        title,
        status_line: status_line(snapshot),
        color: if snapshot.reachable { COLOR_ONLINE } else { COLOR_OFFLINE },
        timestamp_field: relative_timestamp(now),
        reason_footer: reason_footer(reason, heartbeat),
    }
}

pub fn status_line(snapshot: &ServerSnapshot) -> String {
    if !snapshot.reachable {
        return "🔴 Offline".to_string();
    }
    let capacity = match snapshot.capacity {
        0 => "?".to_string(),
        n => n.to_string(),
    };
    format!("🟢 Online — **{}/{}** players", snapshot.player_count, capacity)
}

pub fn relative_timestamp(now: DateTime<Utc>) -> String {
    format!("<t:{}:R>", now.timestamp())
}

pub fn reason_footer(reason: PostReason, heartbeat: Duration) -> String {
    match reason {
        PostReason::StatusChanged => "🔄 Status changed".to_string(),
        PostReason::Heartbeat => format!(
            "⏱️ Heartbeat (every {})",
            humantime::format_duration(heartbeat)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn online(players: u32, capacity: u32, name: &str) -> ServerSnapshot {
        ServerSnapshot {
            reachable: true,
            player_count: players,
            capacity,
            display_name: name.to_string(),
        }
    }

    #[test]
    fn test_online_payload() {
        let payload = build_payload(
            &online(3, 20, "Convoy"),
            PostReason::StatusChanged,
            "ATS Convoy Server",
            Duration::from_secs(300),
            now(),
        );
        assert_eq!(payload.title, "Convoy");
        assert_eq!(payload.status_line, "🟢 Online — **3/20** players");
        assert_eq!(payload.color, COLOR_ONLINE);
        assert_eq!(payload.timestamp_field, "<t:1700000000:R>");
        assert_eq!(payload.reason_footer, "🔄 Status changed");
    }

    #[test]
    fn test_offline_payload() {
        let payload = build_payload(
            &ServerSnapshot::offline("ATS Convoy Server"),
            PostReason::Heartbeat,
            "ATS Convoy Server",
            Duration::from_secs(300),
            now(),
        );
        assert_eq!(payload.status_line, "🔴 Offline");
        assert_eq!(payload.color, COLOR_OFFLINE);
        assert_eq!(payload.reason_footer, "⏱️ Heartbeat (every 5m)");
    }

    #[test]
    fn test_unknown_capacity_and_blank_name() {
        let payload = build_payload(
            &online(2, 0, ""),
            PostReason::StatusChanged,
            "Fallback",
            Duration::from_secs(300),
            now(),
        );
        assert_eq!(payload.title, "Fallback");
        assert_eq!(payload.status_line, "🟢 Online — **2/?** players");
    }

    #[test]
    fn test_payload_is_deterministic() {
        let snapshot = online(5, 20, "Convoy");
        let every = Duration::from_secs(90);
        let a = build_payload(&snapshot, PostReason::Heartbeat, "L", every, now());
        let b = build_payload(&snapshot, PostReason::Heartbeat, "L", every, now());
        assert_eq!(a, b);
        assert_eq!(a.reason_footer, "⏱️ Heartbeat (every 1m 30s)");
    }
}
