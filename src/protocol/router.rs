use super::{Action, AgentKind, ErrorCode, ErrorPayload, McpMessage, McpResponse, ProtocolError};
use crate::shared::logging::{append_json_log, ROUTER_LOG_FILE};
use crate::shared::now_secs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

/// An agent reachable through the router. Handlers must be safe to call
/// from the router's worker threads.
pub trait AgentHandler: Send + Sync {
    fn kind(&self) -> AgentKind;

    fn handle(&self, message: &McpMessage, call: &CallContext) -> Result<Value, ErrorPayload>;
}

/// Per-call context shared between the router and the running handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    session_id: Option<String>,
    cancelled: Arc<AtomicBool>,
    deadline: Instant,
}

impl CallContext {
    pub fn new(session_id: Option<&str>, timeout: Duration) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Set once the caller stopped waiting. Handlers check it before
    /// publishing side effects.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

pub fn decode_request<T: DeserializeOwned>(message: &McpMessage) -> Result<T, ErrorPayload> {
    message
        .decode()
        .map_err(|err| ErrorPayload::new(ErrorCode::InvalidRequest, err.to_string()))
}

pub fn encode_result<T: Serialize>(action: Action, value: &T) -> Result<Value, ErrorPayload> {
    serde_json::to_value(value).map_err(|err| {
        ErrorPayload::new(
            ErrorCode::Internal,
            format!("result for `{action}` could not be encoded: {err}"),
        )
    })
}

#[derive(Default)]
pub struct MessageRouterBuilder {
    handlers: BTreeMap<AgentKind, Arc<dyn AgentHandler>>,
    log_root: Option<PathBuf>,
}

impl MessageRouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn AgentHandler>) -> Result<Self, ProtocolError> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(ProtocolError::DuplicateAgent(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(self)
    }

    pub fn log_to(mut self, state_root: impl Into<PathBuf>) -> Self {
        self.log_root = Some(state_root.into());
        self
    }

    pub fn build(self) -> MessageRouter {
        MessageRouter {
            handlers: self.handlers,
            log_root: self.log_root,
        }
    }
}

/// Registry of agents. Frozen after `build`, so lookups need no locking.
pub struct MessageRouter {
    handlers: BTreeMap<AgentKind, Arc<dyn AgentHandler>>,
    log_root: Option<PathBuf>,
}

impl MessageRouter {
    pub fn builder() -> MessageRouterBuilder {
        MessageRouterBuilder::new()
    }

    pub fn registered_agents(&self) -> Vec<AgentKind> {
        self.handlers.keys().copied().collect()
    }

    /// Delivers `message` and waits at most `timeout` for the reply. A late
    /// reply is discarded and the handler is told to cancel.
    pub fn send(
        &self,
        message: McpMessage,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> McpResponse {
        let started = Instant::now();
        let agent = message.target_agent();
        let action = message.action();
        let response = self.dispatch(message, session_id, timeout);
        self.log_call(agent, action, session_id, &response, started.elapsed());
        response
    }

    fn dispatch(
        &self,
        message: McpMessage,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> McpResponse {
        let agent = message.target_agent();
        let Some(handler) = self.handlers.get(&agent).cloned() else {
            return McpResponse::failure(
                ErrorPayload::new(
                    ErrorCode::UnknownRoute,
                    format!("no agent registered as `{agent}`"),
                )
                .with("agent", agent.as_str()),
            );
        };
        if message.action().owner() != agent {
            return McpResponse::failure(ErrorPayload::new(
                ErrorCode::UnknownRoute,
                format!("agent `{agent}` does not handle `{}`", message.action()),
            ));
        }

        let call = CallContext::new(session_id, timeout);
        let worker_call = call.clone();
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("agent-{}", message.action()))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    handler.handle(&message, &worker_call)
                }));
                let _ = tx.send(outcome);
            });
        if let Err(err) = spawned {
            return McpResponse::failure(ErrorPayload::new(
                ErrorCode::Transport,
                format!("failed to start agent worker: {err}"),
            ));
        }

        match rx.recv_timeout(timeout) {
            Ok(Ok(Ok(value))) => McpResponse::ok(value),
            Ok(Ok(Err(error))) => McpResponse::failure(error),
            Ok(Err(panic)) => McpResponse::failure(ErrorPayload::new(
                ErrorCode::Internal,
                format!("agent `{agent}` panicked: {}", panic_message(&panic)),
            )),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                call.cancel();
                McpResponse::failure(
                    ErrorPayload::new(
                        ErrorCode::Timeout,
                        format!("agent `{agent}` did not answer within {}ms", timeout.as_millis()),
                    )
                    .with("timeout_ms", timeout.as_millis() as u64),
                )
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => McpResponse::failure(ErrorPayload::new(
                ErrorCode::Transport,
                format!("agent `{agent}` worker exited without replying"),
            )),
        }
    }

    fn log_call(
        &self,
        agent: AgentKind,
        action: Action,
        session_id: Option<&str>,
        response: &McpResponse,
        elapsed: Duration,
    ) {
        let Some(root) = self.log_root.as_deref() else {
            return;
        };
        let mut fields = Map::new();
        fields.insert("agent".to_string(), Value::from(agent.as_str()));
        fields.insert("action".to_string(), Value::from(action.as_str()));
        fields.insert(
            "sessionId".to_string(),
            session_id.map(Value::from).unwrap_or(Value::Null),
        );
        fields.insert("success".to_string(), Value::Bool(response.is_success()));
        fields.insert("elapsedMs".to_string(), Value::from(elapsed.as_millis() as u64));
        let level = match response.error() {
            Some(error) => {
                fields.insert("code".to_string(), Value::from(error.code.to_string()));
                fields.insert("message".to_string(), Value::from(error.message.clone()));
                "warn"
            }
            None => "info",
        };
        append_json_log(root, ROUTER_LOG_FILE, now_secs(), level, "agent.call", fields);
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = panic.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic".to_string()
}
