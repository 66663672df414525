use serde::{Deserialize, Serialize};

use crate::error::ErrorStage;
use crate::protocol::canonical::GenerationOp;

/// Why a run ended successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationCause {
    /// The provider closed the response body cleanly.
    DispatchClose,
    /// The provider sent the in-band end-of-stream sentinel.
    EventDone,
    /// The caller cancelled the run.
    ClientAbort,
}

impl TerminationCause {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationCause::DispatchClose => "dispatch-close",
            TerminationCause::EventDone => "event-done",
            TerminationCause::ClientAbort => "client-abort",
        }
    }
}

/// One element of the output sequence delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutputEvent {
    Start,
    Op(GenerationOp),
    /// Development-only echo of the outbound request body.
    DebugDispatchRequest {
        url: String,
        body: String,
    },
    Termination {
        cause: TerminationCause,
    },
    Error {
        stage: ErrorStage,
        message: String,
        visible_to_shared_log: bool,
    },
}

impl OutputEvent {
    /// Whether this event ends the output sequence.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutputEvent::Termination { .. } | OutputEvent::Error { .. }
        )
    }

    #[must_use]
    pub fn error_stage(&self) -> Option<ErrorStage> {
        match self {
            OutputEvent::Error { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    #[must_use]
    pub fn termination_cause(&self) -> Option<TerminationCause> {
        match self {
            OutputEvent::Termination { cause } => Some(*cause),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(!OutputEvent::Start.is_terminal());
        assert!(!OutputEvent::Op(GenerationOp::text_delta("x")).is_terminal());
        assert!(OutputEvent::Termination {
            cause: TerminationCause::EventDone
        }
        .is_terminal());
        assert!(OutputEvent::Error {
            stage: ErrorStage::DispatchRead,
            message: String::new(),
            visible_to_shared_log: false,
        }
        .is_terminal());
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(OutputEvent::Op(GenerationOp::text_delta("Hi"))).unwrap();
        assert_eq!(json["type"], "op");
        assert_eq!(json["op"], "text-delta");
        assert_eq!(json["text"], "Hi");

        let json = serde_json::to_value(OutputEvent::Termination {
            cause: TerminationCause::DispatchClose,
        })
        .unwrap();
        assert_eq!(json["type"], "termination");
        assert_eq!(json["cause"], "dispatch-close");
    }
}
