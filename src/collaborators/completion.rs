use super::{run_command, CollaboratorError, TextCompletion};
use crate::config::ToolCommand;
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const TOOL: &str = "completion";

/// Sends the prompt on stdin and returns trimmed stdout.
#[derive(Debug, Clone)]
pub struct CommandCompletion {
    command: ToolCommand,
    timeout: Duration,
}

impl CommandCompletion {
    pub fn new(command: ToolCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl TextCompletion for CommandCompletion {
    fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let args = self.command.render_args(&BTreeMap::new());
        let output = run_command(TOOL, &self.command.binary, &args, Some(prompt), self.timeout)?;
        let text = output.stdout.trim();
        if text.is_empty() {
            return Err(CollaboratorError::Parse {
                tool: TOOL.to_string(),
                reason: "empty completion".to_string(),
            });
        }
        Ok(text.to_string())
    }
}

/// Stand-in used when no completion tool is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCompletion;

impl TextCompletion for UnavailableCompletion {
    fn complete(&self, _prompt: &str) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable {
            tool: TOOL.to_string(),
            reason: "no completion tool configured".to_string(),
        })
    }
}

/// Bounds every completion call with a timeout and retries transport
/// failures once. Callers pair it with a static fallback through
/// [`GuardedCompletion::complete_or`].
#[derive(Clone)]
pub struct GuardedCompletion {
    inner: Arc<dyn TextCompletion>,
    timeout: Duration,
    max_retries: u32,
}

impl GuardedCompletion {
    pub fn new(inner: Arc<dyn TextCompletion>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            max_retries: 1,
        }
    }

    pub fn unavailable() -> Self {
        Self::new(Arc::new(UnavailableCompletion), Duration::from_secs(1))
    }

    fn attempt(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_string();
        thread::Builder::new()
            .name("completion".to_string())
            .spawn(move || {
                let _ = tx.send(inner.complete(&prompt));
            })
            .map_err(|err| CollaboratorError::Unavailable {
                tool: TOOL.to_string(),
                reason: err.to_string(),
            })?;
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(CollaboratorError::Timeout {
                tool: TOOL.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(CollaboratorError::Unavailable {
                tool: TOOL.to_string(),
                reason: "completion worker exited without replying".to_string(),
            }),
        }
    }

    /// Returns the completion, or `fallback()` when the capability is degraded.
    pub fn complete_or(&self, prompt: &str, fallback: impl FnOnce() -> String) -> String {
        self.complete(prompt).unwrap_or_else(|_| fallback())
    }
}

impl TextCompletion for GuardedCompletion {
    fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let mut attempt = 0;
        loop {
            match self.attempt(prompt) {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transport() && attempt < self.max_retries => attempt += 1,
                Err(err) => return Err(err),
            }
        }
    }
}
