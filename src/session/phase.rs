use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialized,
    DetectingFormat,
    AwaitingFormatSelection,
    CollectingMetadata,
    Converting,
    Validating,
    AwaitingRetryApproval,
    NoProgress,
    Correcting,
    Reconverting,
    Completed,
    Abandoned,
}

impl Phase {
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Phase::Abandoned {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Phase::Initialized, Phase::DetectingFormat)
                | (Phase::DetectingFormat, Phase::AwaitingFormatSelection)
                | (Phase::DetectingFormat, Phase::CollectingMetadata)
                | (Phase::AwaitingFormatSelection, Phase::CollectingMetadata)
                | (Phase::CollectingMetadata, Phase::Converting)
                | (Phase::Converting, Phase::Validating)
                | (Phase::Converting, Phase::CollectingMetadata)
                | (Phase::Converting, Phase::AwaitingFormatSelection)
                | (Phase::Validating, Phase::Completed)
                | (Phase::Validating, Phase::AwaitingRetryApproval)
                | (Phase::Validating, Phase::NoProgress)
                | (Phase::AwaitingRetryApproval, Phase::Correcting)
                | (Phase::AwaitingRetryApproval, Phase::Completed)
                | (Phase::NoProgress, Phase::Correcting)
                | (Phase::NoProgress, Phase::Completed)
                | (Phase::Correcting, Phase::Reconverting)
                | (Phase::Reconverting, Phase::Validating)
                | (Phase::Reconverting, Phase::AwaitingRetryApproval)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Abandoned)
    }

    /// Phases that block on a user answer.
    pub fn awaits_user(self) -> bool {
        matches!(
            self,
            Phase::AwaitingFormatSelection
                | Phase::CollectingMetadata
                | Phase::AwaitingRetryApproval
                | Phase::NoProgress
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Initialized => "initialized",
            Phase::DetectingFormat => "detecting_format",
            Phase::AwaitingFormatSelection => "awaiting_format_selection",
            Phase::CollectingMetadata => "collecting_metadata",
            Phase::Converting => "converting",
            Phase::Validating => "validating",
            Phase::AwaitingRetryApproval => "awaiting_retry_approval",
            Phase::NoProgress => "no_progress",
            Phase::Correcting => "correcting",
            Phase::Reconverting => "reconverting",
            Phase::Completed => "completed",
            Phase::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
