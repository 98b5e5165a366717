use super::{Orchestrator, OrchestratorError};
use crate::protocol::{Action, McpMessage};
use crate::session::WorkflowState;
use crate::shared::now_secs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Transport failures get exactly one automatic retry.
const TRANSPORT_RETRIES: u32 = 1;

impl Orchestrator {
    /// Sends one typed request for `state`'s session and decodes the reply.
    /// Calls are strictly sequential within a session.
    pub(super) fn call_agent<Req, Resp>(
        &self,
        state: &mut WorkflowState,
        action: Action,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp, OrchestratorError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let message = McpMessage::with_payload(action, request)?;
        let session_id = state.session_id.as_str().to_string();
        let mut retries = 0;
        loop {
            let response = self
                .router
                .send(message.clone(), Some(&session_id), timeout);
            match response.into_result() {
                Ok(value) => {
                    return serde_json::from_value(value)
                        .map_err(|source| OrchestratorError::UnexpectedResult { action, source })
                }
                Err(payload) if payload.code.is_retryable() && retries < TRANSPORT_RETRIES => {
                    retries += 1;
                    state.log(
                        now_secs(),
                        "warn",
                        "agent.retry",
                        format!("{action} failed with {}; retrying once", payload.code),
                    );
                }
                Err(payload) if payload.code.is_retryable() => {
                    return Err(OrchestratorError::AgentUnavailable { action, payload })
                }
                Err(payload) => return Err(OrchestratorError::Agent { action, payload }),
            }
        }
    }
}
