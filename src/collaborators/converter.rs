use super::{io_error, run_command, CollaboratorError, ConversionJob, ConversionLibrary};
use crate::config::ConverterTool;
use crate::shared::fs_atomic::{atomic_write_file, remove_if_exists};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const TOOL: &str = "converter";

/// Conversion library reached through an external command. Structured
/// metadata is handed over as a JSON file next to the output.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    tool: ConverterTool,
    default_formats: Vec<String>,
}

impl CommandConverter {
    /// `default_formats` applies when the tool does not list its own.
    pub fn new(tool: ConverterTool, default_formats: Vec<String>) -> Self {
        Self {
            tool,
            default_formats,
        }
    }
}

fn metadata_file_for(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!(".{name}.metadata-{}.json", std::process::id()))
}

impl ConversionLibrary for CommandConverter {
    fn convert(&self, job: &ConversionJob<'_>) -> Result<(), CollaboratorError> {
        let metadata_path = metadata_file_for(job.output);
        let encoded =
            serde_json::to_vec_pretty(job.metadata).map_err(|err| CollaboratorError::Parse {
                tool: TOOL.to_string(),
                reason: format!("failed to encode metadata: {err}"),
            })?;
        atomic_write_file(&metadata_path, &encoded).map_err(|e| io_error(&metadata_path, e))?;

        let vars = BTreeMap::from([
            ("input", job.input.display().to_string()),
            ("output", job.output.display().to_string()),
            ("format", job.format.to_string()),
            ("metadata", metadata_path.display().to_string()),
        ]);
        let args = self.tool.command.render_args(&vars);
        let result = run_command(TOOL, &self.tool.command.binary, &args, None, job.timeout);
        let _ = remove_if_exists(&metadata_path);
        result?;

        if !job.output.is_file() {
            return Err(CollaboratorError::NoOutput {
                tool: TOOL.to_string(),
                path: job.output.display().to_string(),
            });
        }
        Ok(())
    }

    fn supported_formats(&self) -> Vec<String> {
        if self.tool.supported_formats.is_empty() {
            self.default_formats.clone()
        } else {
            self.tool.supported_formats.clone()
        }
    }
}
