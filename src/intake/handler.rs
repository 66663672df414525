use crate::error::ErrorStage;
use crate::observability::mirror_to_shared_log;
use crate::stream::WireMessage;

use super::events::{OutputEvent, TerminationCause};

/// Lifecycle flags of one invocation.
///
/// `terminated` only ever goes from `false` to `true`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeState {
    terminated: bool,
    start_emitted: bool,
}

impl IntakeState {
    #[must_use]
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    #[must_use]
    pub fn start_emitted(&self) -> bool {
        self.start_emitted
    }
}

/// Receiving-side lifecycle framing: start, exactly one terminal event.
///
/// Every lifecycle method returns the event to emit, or `None` when the
/// transition is not allowed anymore.
#[derive(Debug)]
pub struct IntakeHandler {
    state: IntakeState,
    provider_label: String,
    received_messages: u64,
    received_bytes: u64,
}

impl IntakeHandler {
    #[must_use]
    pub fn new(provider_label: impl Into<String>) -> Self {
        Self {
            state: IntakeState::default(),
            provider_label: provider_label.into(),
            received_messages: 0,
            received_bytes: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> IntakeState {
        self.state
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state.terminated
    }

    #[must_use]
    pub fn received_messages(&self) -> u64 {
        self.received_messages
    }

    #[must_use]
    pub fn provider_label(&self) -> &str {
        &self.provider_label
    }

    /// Emit the `start` event. Must precede everything else.
    pub fn yield_start(&mut self) -> Option<OutputEvent> {
        if self.state.start_emitted {
            tracing::error!(provider = %self.provider_label, "start requested twice");
            return None;
        }
        self.state.start_emitted = true;
        Some(OutputEvent::Start)
    }

    /// Observability hook for every demultiplexed message.
    pub fn on_received_wire_message(&mut self, message: &WireMessage) {
        self.received_messages += 1;
        self.received_bytes += message.payload_len() as u64;
        match message {
            WireMessage::Event { data, name } => tracing::trace!(
                seq = self.received_messages,
                name = name.as_deref().unwrap_or(""),
                len = data.len(),
                "wire event"
            ),
            WireMessage::Comment(text) => {
                tracing::trace!(seq = self.received_messages, comment = %text, "wire comment");
            }
        }
    }

    /// Terminate successfully. A second terminal request is dropped.
    pub fn yield_termination(&mut self, cause: TerminationCause) -> Option<OutputEvent> {
        if self.state.terminated {
            tracing::error!(
                provider = %self.provider_label,
                cause = cause.as_str(),
                "termination requested on an already terminated intake"
            );
            return None;
        }
        self.state.terminated = true;
        tracing::debug!(
            cause = cause.as_str(),
            messages = self.received_messages,
            bytes = self.received_bytes,
            "intake terminated"
        );
        Some(OutputEvent::Termination { cause })
    }

    /// Terminate with an error. A second terminal request is dropped.
    pub fn yield_error(
        &mut self,
        stage: ErrorStage,
        message: impl Into<String>,
        visible_to_shared_log: bool,
    ) -> Option<OutputEvent> {
        let message = message.into();
        if self.state.terminated {
            tracing::error!(
                provider = %self.provider_label,
                stage = stage.as_str(),
                %message,
                "error requested on an already terminated intake"
            );
            return None;
        }
        self.state.terminated = true;
        if visible_to_shared_log {
            mirror_to_shared_log(&self.provider_label, stage, &message);
        } else {
            tracing::debug!(stage = stage.as_str(), %message, "intake error");
        }
        Some(OutputEvent::Error {
            stage,
            message,
            visible_to_shared_log,
        })
    }

    /// Terminate without emitting anything (the caller already went away).
    pub fn mark_termination(&mut self) {
        if !self.state.terminated {
            tracing::debug!(
                messages = self.received_messages,
                "intake terminated silently"
            );
        }
        self.state.terminated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_only_once() {
        let mut intake = IntakeHandler::new("OpenAI");
        assert_eq!(intake.yield_start(), Some(OutputEvent::Start));
        assert_eq!(intake.yield_start(), None);
        assert!(intake.state().start_emitted());
    }

    #[test]
    fn test_termination_is_idempotent() {
        let mut intake = IntakeHandler::new("OpenAI");
        let first = intake.yield_termination(TerminationCause::EventDone);
        assert_eq!(
            first,
            Some(OutputEvent::Termination {
                cause: TerminationCause::EventDone
            })
        );
        assert!(intake.is_terminated());
        assert_eq!(intake.yield_termination(TerminationCause::DispatchClose), None);
        assert_eq!(
            intake.yield_error(ErrorStage::DispatchParse, "late", true),
            None
        );
    }

    #[test]
    fn test_error_terminates() {
        let mut intake = IntakeHandler::new("Anthropic");
        let event = intake
            .yield_error(ErrorStage::DispatchRead, "boom", false)
            .expect("first error");
        assert_eq!(event.error_stage(), Some(ErrorStage::DispatchRead));
        assert!(intake.is_terminated());
        assert_eq!(intake.yield_termination(TerminationCause::DispatchClose), None);
    }

    #[test]
    fn test_mark_termination_is_silent_and_final() {
        let mut intake = IntakeHandler::new("Gemini");
        intake.mark_termination();
        assert!(intake.is_terminated());
        assert_eq!(intake.yield_error(ErrorStage::DispatchRead, "x", false), None);
    }

    #[test]
    fn test_wire_messages_do_not_terminate() {
        let mut intake = IntakeHandler::new("Ollama");
        intake.on_received_wire_message(&WireMessage::Event {
            data: "[DONE]".to_owned(),
            name: None,
        });
        intake.on_received_wire_message(&WireMessage::Comment("ping".to_owned()));
        assert_eq!(intake.received_messages(), 2);
        assert!(!intake.is_terminated());
    }
}
