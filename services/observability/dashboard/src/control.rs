//! Operator control surface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response to a control command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    /// False when the command did not change state or could not be delivered
    pub ok: bool,
    pub message: String,
    /// Engine state after the command
    pub state: Value,
}

/// Commands the dashboard can forward to the engine
#[async_trait]
pub trait ControlSurface: Send + Sync + 'static {
    /// Emergency stop
    async fn panic(&self) -> ControlReply;

    async fn resume(&self) -> ControlReply;

    async fn reset(&self) -> ControlReply;

    async fn status(&self) -> Value;
}

/// Control command sent over an open WebSocket, e.g. `{"command": "panic"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ClientCommand {
    Panic,
    Resume,
    Reset,
}

impl ClientCommand {
    pub async fn apply(self, surface: &dyn ControlSurface) -> ControlReply {
        match self {
            ClientCommand::Panic => surface.panic().await,
            ClientCommand::Resume => surface.resume().await,
            ClientCommand::Reset => surface.reset().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_command() {
        let command: ClientCommand = serde_json::from_str(r#"{"command":"panic"}"#).unwrap();
        assert_eq!(command, ClientCommand::Panic);
        assert!(serde_json::from_str::<ClientCommand>(r#"{"command":"liquidate"}"#).is_err());
    }
}
