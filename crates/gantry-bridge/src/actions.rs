//! Normalized action vocabulary.
//!
//! Actions are what the caller consumes instead of raw gateway frames.
//! They are produced only by the bridge and delivered in frame arrival
//! order.

use serde::{Deserialize, Serialize};

/// Final status reported when an agent run ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// The run is still in progress.
    Running,
    /// The run finished successfully.
    Completed,
    /// The run failed or was aborted.
    Error,
}

/// Severity of a [`Action::Notice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    /// Informational.
    Info,
    /// Something degraded but recoverable.
    Warning,
    /// Something failed.
    Error,
}

/// One normalized action derived from the gateway stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// An agent run began.
    ActivateAgent {
        /// Agent label, from the event or the bridge default.
        agent: String,
        /// Accompanying message, possibly empty.
        message: String,
    },
    /// An agent run reached a terminal outcome.
    DeactivateAgent {
        /// Agent label captured when the run started.
        agent: String,
        /// Terminal status.
        status: AgentStatus,
        /// Accompanying message.
        message: String,
    },
    /// Informational or diagnostic notice.
    Notice {
        /// Severity.
        level: NoticeLevel,
        /// Notice text.
        message: String,
    },
    /// The gateway is asking the operator a question.
    Ask {
        /// Question text.
        question: String,
    },
    /// Raw terminal output streamed from the gateway.
    Terminal {
        /// Terminal content.
        content: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn activate_serializes_with_tag() {
        let action = Action::ActivateAgent {
            agent: "coder".into(),
            message: "Fix the build".into(),
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["action"], "activate_agent");
        assert_eq!(v["agent"], "coder");
    }

    #[test]
    fn deactivate_status_is_snake_case() {
        let action = Action::DeactivateAgent {
            agent: "coder".into(),
            status: AgentStatus::Completed,
            message: String::new(),
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["status"], "completed");
    }

    #[test]
    fn notice_levels_roundtrip() {
        for level in [NoticeLevel::Info, NoticeLevel::Warning, NoticeLevel::Error] {
            let action = Action::Notice {
                level,
                message: "m".into(),
            };
            let json = serde_json::to_string(&action).unwrap();
            let back: Action = serde_json::from_str(&json).unwrap();
            assert_eq!(back, action);
        }
    }

    #[test]
    fn wire_format_fixture() {
        let raw = json!({
            "action": "deactivate_agent",
            "agent": "coder",
            "status": "error",
            "message": "Run failed",
        });
        let action: Action = serde_json::from_value(raw).unwrap();
        assert_eq!(
            action,
            Action::DeactivateAgent {
                agent: "coder".into(),
                status: AgentStatus::Error,
                message: "Run failed".into(),
            }
        );
    }
}
