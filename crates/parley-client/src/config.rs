//! Client configuration.

use std::time::Duration;

use parley_core::ConnectionConfig;

use crate::worker_pool::DEFAULT_WORKERS;

/// Where outbound chat messages go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageRoute {
    /// As `message` frames on the control channel.
    #[default]
    Control,
    /// As rows of the replicated `messages` table.
    Replicated,
}

/// Client runtime configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL (`ws://host:port`)
    pub server_url: String,
    /// Room to join
    pub room: String,
    /// Initially active channel
    pub channel: String,
    /// Crypto worker count
    pub worker_count: usize,
    /// Period of the status timer
    pub tick_interval: Duration,
    /// Outbound message route
    pub route: MessageRoute,
    /// Run the replicated store's sync channel
    pub sync_enabled: bool,
    /// Connection state machine settings
    pub connection: ConnectionConfig,
}

impl ClientConfig {
    /// Control channel URL of the room.
    pub fn control_url(&self) -> String {
        format!("{}/room/{}", self.server_url.trim_end_matches('/'), self.room)
    }

    /// Sync relay URL of the room.
    pub fn sync_url(&self) -> String {
        format!("{}/sync/{}", self.server_url.trim_end_matches('/'), self.room)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".to_string(),
            room: "lobby".to_string(),
            channel: "general".to_string(),
            worker_count: DEFAULT_WORKERS,
            tick_interval: Duration::from_millis(250),
            route: MessageRoute::Control,
            sync_enabled: true,
            connection: ConnectionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_room_scoped() {
        let config = ClientConfig {
            server_url: "wss://chat.example/".to_string(),
            room: "lobby".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(config.control_url(), "wss://chat.example/room/lobby");
        assert_eq!(config.sync_url(), "wss://chat.example/sync/lobby");
    }
}
