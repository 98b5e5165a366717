use super::{Action, AgentKind};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown agent `{0}`")]
    UnknownAgent(String),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("action `{action}` is not handled by agent `{agent}`")]
    ActionNotOwned { agent: AgentKind, action: Action },
    #[error("agent `{0}` is registered more than once")]
    DuplicateAgent(AgentKind),
    #[error("payload for `{action}` could not be encoded: {source}")]
    Encode {
        action: Action,
        #[source]
        source: serde_json::Error,
    },
    #[error("payload for `{action}` could not be decoded: {source}")]
    Decode {
        action: Action,
        #[source]
        source: serde_json::Error,
    },
}
