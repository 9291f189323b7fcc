/*!
# Statusbeacon DevKit - Stubs and utilities for development

Lets the agent run end to end without Discord or a game server:
- Mock Discord webhook (HTTP) with message lifecycle and failure injection
- Mock A2S game server (UDP) with challenge and offline modes
- Test harness wiring both to a scratch state file
*/

pub mod a2s_stub;
pub mod test_utils;
pub mod webhook_stub;

pub use a2s_stub::{A2sServerInfo, MockA2sServer};
pub use test_utils::TestHarness;
pub use webhook_stub::{MockWebhookServer, RecordedRequest};
