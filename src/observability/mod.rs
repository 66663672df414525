use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::error::ErrorStage;
use crate::protocol::canonical::{StopReason, Usage};

/// `tracing` target of the shared operational log.
pub const SHARED_LOG_TARGET: &str = "chatwire::shared";

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, ERROR)
///
/// Output goes to stderr so stdout stays reserved for output events.
pub fn init_tracing(log_level: &str) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Map a configured log level to an `EnvFilter` directive, `None` when disabled.
#[must_use]
pub fn tracing_directive(log_level: &str) -> Option<&'static str> {
    match log_level.trim().to_uppercase().as_str() {
        "DISABLED" => None,
        "TRACE" => Some("TRACE"),
        "DEBUG" => Some("DEBUG"),
        "WARNING" | "WARN" => Some("WARN"),
        "ERROR" | "CRITICAL" => Some("ERROR"),
        _ => Some("INFO"),
    }
}

/// Write a pipeline error to the shared operational log.
pub fn mirror_to_shared_log(provider: &str, stage: ErrorStage, message: &str) {
    tracing::warn!(
        target: SHARED_LOG_TARGET,
        provider,
        stage = stage.as_str(),
        "{message}"
    );
}

/// How an invocation ended, for the completion log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    Terminated(&'static str),
    Failed(ErrorStage),
    Aborted,
}

impl InvocationOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationOutcome::Terminated(cause) => cause,
            InvocationOutcome::Failed(stage) => stage.as_str(),
            InvocationOutcome::Aborted => "aborted",
        }
    }
}

/// Log the completion line of one invocation.
pub fn log_invocation_complete(
    model: &str,
    outcome: InvocationOutcome,
    usage: Option<&Usage>,
    finish_reason: Option<StopReason>,
    start_time: Instant,
) {
    let elapsed_ms = start_time.elapsed().as_millis() as u64;
    let input_tokens = usage.and_then(|u| u.input_tokens).unwrap_or(0);
    let output_tokens = usage.and_then(|u| u.output_tokens).unwrap_or(0);
    let total_tokens = usage
        .and_then(|u| u.total_tokens)
        .unwrap_or(input_tokens + output_tokens);
    let finish = finish_reason.map_or("none", StopReason::as_str);

    match outcome {
        InvocationOutcome::Failed(_) => tracing::warn!(
            model,
            outcome = outcome.as_str(),
            elapsed_ms,
            "invocation failed"
        ),
        _ => tracing::info!(
            model,
            outcome = outcome.as_str(),
            finish,
            input_tokens,
            output_tokens,
            total_tokens,
            elapsed_ms,
            "invocation complete"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(tracing_directive("warning"), Some("WARN"));
        assert_eq!(tracing_directive("CRITICAL"), Some("ERROR"));
        assert_eq!(tracing_directive("Debug"), Some("DEBUG"));
        assert_eq!(tracing_directive("DISABLED"), None);
        assert_eq!(tracing_directive("nonsense"), Some("INFO"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(
            InvocationOutcome::Failed(ErrorStage::DispatchParse).as_str(),
            "dispatch-parse"
        );
        assert_eq!(InvocationOutcome::Terminated("event-done").as_str(), "event-done");
        assert_eq!(InvocationOutcome::Aborted.as_str(), "aborted");
    }
}
