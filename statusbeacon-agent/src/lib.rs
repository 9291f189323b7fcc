//! Statusbeacon Agent - game server status mirrored into one Discord message
//!
//! The agent polls a game server over A2S and keeps a single webhook message
//! up to date:
//! - Posts when reachability, players, capacity or name change
//! - Otherwise refreshes the message once per heartbeat interval
//! - Edits the tracked message, recreating it only if it was deleted
//! - Persists what it posted so restarts keep editing the same message

pub mod config;
pub mod detect;
pub mod query;
pub mod reconcile;
pub mod render;
pub mod snapshot;
pub mod store;
pub mod webhook;

pub use config::{Config, ConfigError};
pub use query::{A2sQuery, StatusQuery};
pub use reconcile::{CycleError, CycleOutcome, Reconciler};
pub use webhook::{DiscordWebhook, WebhookApi, WebhookError};
