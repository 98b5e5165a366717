//! Conversion agent: format detection, conversion through the external
//! library, and versioned reconversion during correction cycles.

pub mod detect;
pub mod error;
pub mod versioning;

pub use detect::{canonical_format, detect_format, input_size_bytes, known_formats};
pub use error::ConversionError;
pub use versioning::{back_up_output, versioned_path};

use crate::collaborators::{ConversionJob, ConversionLibrary, GuardedCompletion};
use crate::metadata::{merge_into, structure_metadata, validate_flat, Metadata, MetadataError};
use crate::protocol::{
    decode_request, encode_result, Action, AgentHandler, AgentKind, ApplyCorrectionsRequest,
    CallContext, ConversionOutcome, CorrectionOutcome, CorrectionStatus, DetectFormatRequest,
    ErrorCode, ErrorPayload, FormatDetection, McpMessage, RunConversionRequest,
};
use crate::shared::checksum::sha256_file;
use crate::shared::fs_atomic::{remove_if_exists, staging_path};
use error::io_error;
use serde_json::Value;
use std::fs;
use std::sync::Arc;

pub struct ConversionAgent {
    library: Arc<dyn ConversionLibrary>,
    completion: GuardedCompletion,
    confidence_threshold: u8,
}

impl ConversionAgent {
    pub fn new(
        library: Arc<dyn ConversionLibrary>,
        completion: GuardedCompletion,
        confidence_threshold: u8,
    ) -> Self {
        Self {
            library,
            completion,
            confidence_threshold,
        }
    }

    pub fn detect_format(
        &self,
        request: &DetectFormatRequest,
    ) -> Result<FormatDetection, ConversionError> {
        if !request.input_path.exists() {
            return Err(ConversionError::MissingInput {
                path: request.input_path.display().to_string(),
            });
        }
        let names = detect::list_file_names(&request.input_path)
            .map_err(|e| io_error(&request.input_path, e))?;
        Ok(detect_format(
            &names,
            &self.completion,
            self.confidence_threshold,
        ))
    }

    /// Converts into a staging file and publishes it over `output_path` only
    /// on success. The staging file never survives a failure or cancellation.
    pub fn run_conversion(
        &self,
        request: &RunConversionRequest,
        call: &CallContext,
    ) -> Result<ConversionOutcome, ConversionError> {
        if !request.input_path.exists() {
            return Err(ConversionError::MissingInput {
                path: request.input_path.display().to_string(),
            });
        }
        if !self.library.supports(&request.format) {
            return Err(ConversionError::UnsupportedFormat {
                format: request.format.clone(),
                supported: self.library.supported_formats(),
            });
        }
        validate_flat(&request.metadata).map_err(ConversionError::InvalidMetadata)?;
        let structured =
            structure_metadata(&request.metadata).map_err(|err| self.explain(err))?;

        if let Some(parent) = request.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
        }

        let staged = staging_path(&request.output_path);
        let job = ConversionJob {
            input: &request.input_path,
            format: &request.format,
            metadata: &structured,
            output: &staged,
            timeout: call.remaining(),
        };
        if let Err(err) = self.library.convert(&job) {
            let _ = remove_if_exists(&staged);
            return Err(ConversionError::Library(err));
        }
        if call.is_cancelled() {
            let _ = remove_if_exists(&staged);
            return Err(ConversionError::Cancelled);
        }
        if let Err(err) = fs::rename(&staged, &request.output_path) {
            let _ = remove_if_exists(&staged);
            return Err(io_error(&request.output_path, err));
        }

        let checksum = sha256_file(&request.output_path)
            .map_err(|e| io_error(&request.output_path, e))?;
        Ok(ConversionOutcome {
            output_path: request.output_path.clone(),
            checksum,
        })
    }

    /// Backs up the current output as version `attempt`, merges auto fixes
    /// then user input (user wins), and reconverts.
    pub fn apply_corrections(
        &self,
        request: &ApplyCorrectionsRequest,
        call: &CallContext,
    ) -> Result<CorrectionOutcome, ConversionError> {
        if request.attempt == 0 {
            return Err(ConversionError::InvalidAttempt(request.attempt));
        }
        if !request.output_path.is_file() {
            return Err(ConversionError::MissingOutput {
                path: request.output_path.display().to_string(),
            });
        }
        let backup = back_up_output(&request.output_path, request.attempt)
            .map_err(|e| io_error(&request.output_path, e))?;

        let mut metadata: Metadata = request.metadata.clone();
        merge_into(&mut metadata, &request.auto_fixes);
        merge_into(&mut metadata, &request.user_input);

        let outcome = self
            .run_conversion(
                &RunConversionRequest {
                    input_path: request.input_path.clone(),
                    output_path: request.output_path.clone(),
                    format: request.format.clone(),
                    metadata: metadata.clone(),
                },
                call,
            )
            .map_err(|source| ConversionError::AfterBackup {
                backup: backup.clone(),
                source: Box::new(source),
            })?;
        Ok(CorrectionOutcome {
            status: CorrectionStatus::Reconverted,
            output_path: outcome.output_path,
            attempt: request.attempt,
            checksum: outcome.checksum,
            backup,
            metadata,
        })
    }

    fn explain(&self, mut err: MetadataError) -> ConversionError {
        let prompt = format!(
            "In one sentence, tell a neuroscientist why the metadata field `{}` was rejected: {}",
            err.field, err.explanation
        );
        let fallback = err.explanation.clone();
        err.explanation = self.completion.complete_or(&prompt, || fallback);
        ConversionError::MalformedMetadata(err)
    }
}

impl AgentHandler for ConversionAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Conversion
    }

    fn handle(&self, message: &McpMessage, call: &CallContext) -> Result<Value, ErrorPayload> {
        let action = message.action();
        match action {
            Action::DetectFormat => {
                let request: DetectFormatRequest = decode_request(message)?;
                let detection = self.detect_format(&request).map_err(|e| e.to_payload())?;
                encode_result(action, &detection)
            }
            Action::RunConversion => {
                let request: RunConversionRequest = decode_request(message)?;
                let outcome = self
                    .run_conversion(&request, call)
                    .map_err(|e| e.to_payload())?;
                encode_result(action, &outcome)
            }
            Action::ApplyCorrections => {
                let request: ApplyCorrectionsRequest = decode_request(message)?;
                let outcome = self
                    .apply_corrections(&request, call)
                    .map_err(|e| e.to_payload())?;
                encode_result(action, &outcome)
            }
            other => Err(ErrorPayload::new(
                ErrorCode::UnknownRoute,
                format!("conversion agent does not handle `{other}`"),
            )),
        }
    }
}
