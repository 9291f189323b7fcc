//! Point-in-time server snapshots
//!
//! A failed query is never an error for the caller: it simply yields an
//! offline snapshot so the status message can say so.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::query::{ServerInfo, StatusQuery};

/// Reported capacities at or below this value are treated as misreported
pub const MISREPORTED_CAPACITY_MAX: u32 = 8;

/// Server status as observed in one cycle (field names match the state file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    #[serde(rename = "online")]
    pub reachable: bool,
    #[serde(rename = "players", default)]
    pub player_count: u32,
    #[serde(rename = "maxplayers", default)]
    pub capacity: u32,
    #[serde(rename = "name", default)]
    pub display_name: String,
}

impl ServerSnapshot {
    pub fn offline(label: &str) -> Self {
        Self {
            reachable: false,
            player_count: 0,
            capacity: 0,
            display_name: label.to_string(),
        }
    }
}

/// Wraps a [`StatusQuery`] and turns each answer (or failure) into a snapshot
pub struct SnapshotSource<Q> {
    query: Q,
    label: String,
    display_capacity: Option<u32>,
}

impl<Q: StatusQuery> SnapshotSource<Q> {
    pub fn new(query: Q, label: impl Into<String>, display_capacity: Option<u32>) -> Self {
        Self {
            query,
            label: label.into(),
            display_capacity,
        }
    }

    pub async fn snapshot(&self) -> ServerSnapshot {
        match self.query.query().await {
            Ok(info) => {
                debug!(
                    "server answered: {} [{}] ({}/{} players, {} bots, map {})",
                    info.name, info.game, info.players, info.max_players, info.bots, info.map
                );
                self.from_info(info)
            }
            Err(e) => {
                warn!("server query failed: {}", e);
                ServerSnapshot::offline(&self.label)
            }
        }
    }

    fn from_info(&self, info: ServerInfo) -> ServerSnapshot {
        let display_name = if info.name.trim().is_empty() {
            self.label.clone()
        } else {
            info.name
        };

        ServerSnapshot {
            reachable: true,
            player_count: info.players,
            capacity: effective_capacity(info.max_players, self.display_capacity),
            display_name,
        }
    }
}

/// Some servers (ATS/ETS2 among them) report a bogus max player count over A2S
pub fn effective_capacity(reported: u32, display_capacity: Option<u32>) -> u32 {
    match display_capacity {
        Some(configured) if configured > 0 && reported <= MISREPORTED_CAPACITY_MAX => configured,
        _ => reported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryError;
    use std::time::Duration;

    struct FixedQuery(Option<ServerInfo>);

    impl StatusQuery for FixedQuery {
        async fn query(&self) -> Result<ServerInfo, QueryError> {
            self.0
                .clone()
                .ok_or(QueryError::Timeout(Duration::from_millis(2500)))
        }
    }

    fn info(name: &str, players: u32, max_players: u32) -> ServerInfo {
        ServerInfo {
            name: name.to_string(),
            map: "usa".to_string(),
            game: "American Truck Simulator".to_string(),
            players,
            max_players,
            bots: 0,
        }
    }

    #[test]
    fn test_capacity_override() {
        assert_eq!(effective_capacity(8, Some(20)), 20);
        assert_eq!(effective_capacity(0, Some(20)), 20);
        assert_eq!(effective_capacity(9, Some(20)), 9);
        assert_eq!(effective_capacity(8, None), 8);
        assert_eq!(effective_capacity(4, Some(0)), 4);
    }

    #[tokio::test]
    async fn test_failed_query_is_offline() {
        let source = SnapshotSource::new(FixedQuery(None), "ATS Convoy Server", Some(20));
        let snapshot = source.snapshot().await;
        assert_eq!(snapshot, ServerSnapshot::offline("ATS Convoy Server"));
    }

    #[tokio::test]
    async fn test_online_snapshot() {
        let source = SnapshotSource::new(FixedQuery(Some(info("Convoy", 3, 8))), "Label", Some(20));
        let snapshot = source.snapshot().await;
        assert!(snapshot.reachable);
        assert_eq!(snapshot.player_count, 3);
        assert_eq!(snapshot.capacity, 20);
        assert_eq!(snapshot.display_name, "Convoy");
    }

    #[tokio::test]
    async fn test_empty_name_falls_back_to_label() {
        let source = SnapshotSource::new(FixedQuery(Some(info("  ", 0, 64))), "Label", None);
        let snapshot = source.snapshot().await;
        assert_eq!(snapshot.display_name, "Label");
        assert_eq!(snapshot.capacity, 64);
    }

    #[test]
    fn test_state_file_field_names() {
        let json = serde_json::to_value(ServerSnapshot::offline("X")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"online": false, "players": 0, "maxplayers": 0, "name": "X"})
        );
    }
}
