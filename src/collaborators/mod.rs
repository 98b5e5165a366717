//! Capabilities the core delegates to: the conversion library, the output
//! validator, and free-text completion. Each has an in-process trait and a
//! process-backed implementation driven by `tools.*` settings.

pub mod completion;
pub mod converter;
pub mod process;
pub mod validator;

pub use completion::{CommandCompletion, GuardedCompletion, UnavailableCompletion};
pub use converter::CommandConverter;
pub use process::{run_command, CommandOutput};
pub use validator::{parse_issue_report, CommandValidator};

use crate::metadata::StructuredMetadata;
use crate::protocol::ValidationIssue;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{tool} did not finish within {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
    #[error("{tool} is unavailable: {reason}")]
    Unavailable { tool: String, reason: String },
    #[error("{tool} exited with status {exit_code}: {stderr}")]
    Failed {
        tool: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("{tool} reported success but wrote no output at {path}")]
    NoOutput { tool: String, path: String },
    #[error("{tool} produced unreadable output: {reason}")]
    Parse { tool: String, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CollaboratorError {
    /// Timeouts and unreachable tools are transport problems, not data problems.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> CollaboratorError {
    CollaboratorError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// One byte-level conversion request.
#[derive(Debug, Clone, Copy)]
pub struct ConversionJob<'a> {
    pub input: &'a Path,
    pub format: &'a str,
    pub metadata: &'a StructuredMetadata,
    pub output: &'a Path,
    pub timeout: Duration,
}

pub trait ConversionLibrary: Send + Sync {
    /// Writes the converted file to `job.output`.
    fn convert(&self, job: &ConversionJob<'_>) -> Result<(), CollaboratorError>;

    fn supported_formats(&self) -> Vec<String>;

    fn supports(&self, format: &str) -> bool {
        self.supported_formats()
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(format))
    }
}

pub trait Validator: Send + Sync {
    fn inspect(
        &self,
        output: &Path,
        timeout: Duration,
    ) -> Result<Vec<ValidationIssue>, CollaboratorError>;
}

pub trait TextCompletion: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, CollaboratorError>;
}
