use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Scanning,
    /// All three steps persisted; waiting on the weight entry.
    AwaitingWeight,
    Complete,
    Exited,
    /// Camera or pose model failed; nothing more can happen in this session.
    Faulted,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Scanning
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scanning => "Scanning",
            SessionStatus::AwaitingWeight => "AwaitingWeight",
            SessionStatus::Complete => "Complete",
            SessionStatus::Exited => "Exited",
            SessionStatus::Faulted => "Faulted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Exited | SessionStatus::Faulted
        )
    }
}
