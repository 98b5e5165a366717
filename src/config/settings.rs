use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub state_root: PathBuf,
    #[serde(default = "default_required_metadata")]
    pub required_metadata: Vec<String>,
    #[serde(default)]
    pub detection: DetectionSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub tools: ToolSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DetectionSettings {
    /// Minimum percent confidence at which a completion-backed classification is trusted.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u8,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_metadata_seconds")]
    pub metadata_seconds: u64,
    #[serde(default = "default_completion_seconds")]
    pub completion_seconds: u64,
    #[serde(default = "default_validation_seconds")]
    pub validation_seconds: u64,
    #[serde(default = "default_conversion_base_seconds")]
    pub conversion_base_seconds: u64,
    #[serde(default = "default_conversion_seconds_per_gib")]
    pub conversion_seconds_per_gib: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            metadata_seconds: default_metadata_seconds(),
            completion_seconds: default_completion_seconds(),
            validation_seconds: default_validation_seconds(),
            conversion_base_seconds: default_conversion_base_seconds(),
            conversion_seconds_per_gib: default_conversion_seconds_per_gib(),
        }
    }
}

impl TimeoutSettings {
    pub fn metadata(&self) -> Duration {
        Duration::from_secs(self.metadata_seconds)
    }

    pub fn completion(&self) -> Duration {
        Duration::from_secs(self.completion_seconds)
    }

    pub fn validation(&self) -> Duration {
        Duration::from_secs(self.validation_seconds)
    }

    /// `base + per_gib * ceil(size_gib)`.
    pub fn conversion_for_bytes(&self, input_bytes: u64) -> Duration {
        let gib = input_bytes.div_ceil(BYTES_PER_GIB);
        Duration::from_secs(
            self.conversion_base_seconds
                .saturating_add(self.conversion_seconds_per_gib.saturating_mul(gib)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolCommand {
    pub binary: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Substitutes `{name}` placeholders in every argument.
    pub fn render_args(&self, vars: &BTreeMap<&str, String>) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{name}}}"), value)
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConverterTool {
    #[serde(flatten)]
    pub command: ToolCommand,
    #[serde(default)]
    pub supported_formats: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolSettings {
    #[serde(default)]
    pub converter: Option<ConverterTool>,
    #[serde(default)]
    pub validator: Option<ToolCommand>,
    #[serde(default)]
    pub completion: Option<ToolCommand>,
}

impl Settings {
    pub fn with_state_root(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            required_metadata: default_required_metadata(),
            detection: DetectionSettings::default(),
            timeouts: TimeoutSettings::default(),
            tools: ToolSettings::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_root.as_os_str().is_empty() {
            return Err(ConfigError::Settings(
                "state_root must be non-empty".to_string(),
            ));
        }
        let threshold = self.detection.confidence_threshold;
        if threshold == 0 || threshold > 100 {
            return Err(ConfigError::Settings(format!(
                "detection.confidence_threshold must be within 1..=100, got {threshold}"
            )));
        }
        for (name, value) in [
            ("metadata_seconds", self.timeouts.metadata_seconds),
            ("completion_seconds", self.timeouts.completion_seconds),
            ("validation_seconds", self.timeouts.validation_seconds),
            ("conversion_base_seconds", self.timeouts.conversion_base_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Settings(format!(
                    "timeouts.{name} must be greater than zero"
                )));
            }
        }
        if let Some(field) = self
            .required_metadata
            .iter()
            .find(|field| field.trim().is_empty())
        {
            return Err(ConfigError::Settings(format!(
                "required_metadata contains an empty field name `{field}`"
            )));
        }
        let commands = [
            ("converter", self.tools.converter.as_ref().map(|t| &t.command)),
            ("validator", self.tools.validator.as_ref()),
            ("completion", self.tools.completion.as_ref()),
        ];
        for (name, command) in commands {
            if let Some(command) = command {
                if command.binary.trim().is_empty() {
                    return Err(ConfigError::Settings(format!(
                        "tools.{name}.binary must be non-empty"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_required_metadata() -> Vec<String> {
    [
        "session_description",
        "session_start_time",
        "experimenter",
        "institution",
        "subject_id",
        "species",
        "sex",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_confidence_threshold() -> u8 {
    70
}

fn default_metadata_seconds() -> u64 {
    30
}

fn default_completion_seconds() -> u64 {
    30
}

fn default_validation_seconds() -> u64 {
    300
}

fn default_conversion_base_seconds() -> u64 {
    600
}

fn default_conversion_seconds_per_gib() -> u64 {
    600
}
