use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for activity logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Access-control changes and deletions: never auto-trimmed.
    Critical,
    #[default]
    Important,
    /// Session chatter (logins, logouts).
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Entities that can be published to the activity log.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of event names, e.g. "user" in "user.created".
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "revoked" => Severity::Critical,
            _ => self.severity(),
        }
    }
}
