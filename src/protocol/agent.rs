use super::ProtocolError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    #[serde(rename = "conversion_agent")]
    Conversion,
    #[serde(rename = "evaluation_agent")]
    Evaluation,
}

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::Conversion, AgentKind::Evaluation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversion => "conversion_agent",
            Self::Evaluation => "evaluation_agent",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "conversion_agent" | "conversion" => Ok(Self::Conversion),
            "evaluation_agent" | "evaluation" => Ok(Self::Evaluation),
            other => Err(ProtocolError::UnknownAgent(other.to_string())),
        }
    }

    pub fn actions(self) -> &'static [Action] {
        match self {
            Self::Conversion => &[
                Action::DetectFormat,
                Action::RunConversion,
                Action::ApplyCorrections,
            ],
            Self::Evaluation => &[Action::RunValidation, Action::AnalyzeCorrections],
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    DetectFormat,
    RunConversion,
    ApplyCorrections,
    RunValidation,
    AnalyzeCorrections,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DetectFormat => "detect_format",
            Self::RunConversion => "run_conversion",
            Self::ApplyCorrections => "apply_corrections",
            Self::RunValidation => "run_validation",
            Self::AnalyzeCorrections => "analyze_corrections",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "detect_format" => Ok(Self::DetectFormat),
            "run_conversion" => Ok(Self::RunConversion),
            "apply_corrections" => Ok(Self::ApplyCorrections),
            "run_validation" => Ok(Self::RunValidation),
            "analyze_corrections" => Ok(Self::AnalyzeCorrections),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }

    pub fn owner(self) -> AgentKind {
        match self {
            Self::DetectFormat | Self::RunConversion | Self::ApplyCorrections => {
                AgentKind::Conversion
            }
            Self::RunValidation | Self::AnalyzeCorrections => AgentKind::Evaluation,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
