use std::fmt;
use std::time::Instant;

use crate::config::Posture;
use crate::dispatch::{ChatGenerateParse, Dialect, DispatchRequest};
use crate::error::{ErrorStage, ParseError};
use crate::intake::{IntakeHandler, OutputEvent, PartTransmitter, TerminationCause, TransmitterConfig};
use crate::observability::{log_invocation_complete, InvocationOutcome};
use crate::stream::{is_done_sentinel, WireMessage};
use crate::util::truncate_for_message;

use super::Invocation;

const PAYLOAD_ECHO_LIMIT: usize = 2 * 1024;

/// Per-invocation bookkeeping shared by every pipeline state.
///
/// Methods enter the invocation span themselves and return the events to
/// emit, so the generator never holds a span guard across a yield.
pub(super) struct RunSession {
    span: tracing::Span,
    intake: IntakeHandler,
    transmitter: PartTransmitter,
    dialect: Dialect,
    custom_endpoint: bool,
    model: String,
    started: Instant,
    outcome: Option<InvocationOutcome>,
}

impl RunSession {
    pub(super) fn new(invocation: &Invocation, transmitter: TransmitterConfig) -> Self {
        let dialect = invocation.access.dialect;
        let span = tracing::info_span!(
            "invocation",
            name = %invocation.context.name,
            ref_id = %invocation.context.ref_id,
            dialect = %dialect,
            model = %invocation.model.id,
            streaming = invocation.streaming,
        );
        Self {
            span,
            intake: IntakeHandler::new(dialect.display_name()),
            transmitter: PartTransmitter::new(transmitter),
            dialect,
            custom_endpoint: invocation.access.is_custom_endpoint(),
            model: invocation.model.id.clone(),
            started: Instant::now(),
            outcome: None,
        }
    }

    pub(super) fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub(super) fn is_terminated(&self) -> bool {
        self.intake.is_terminated()
    }

    pub(super) fn start(&mut self) -> Option<OutputEvent> {
        let _enter = self.span.enter();
        tracing::debug!("invocation started");
        self.intake.yield_start()
    }

    pub(super) fn debug_echo(
        &self,
        request: &DispatchRequest,
        posture: Posture,
    ) -> Option<OutputEvent> {
        let _enter = self.span.enter();
        if posture != Posture::Development {
            tracing::warn!(%posture, "dispatch body echo requested outside development; ignored");
            return None;
        }
        Some(OutputEvent::DebugDispatchRequest {
            url: request.url.to_string(),
            body: request.body_text(),
        })
    }

    /// Successful end: pending operations first, then the termination.
    pub(super) fn terminate(&mut self, cause: TerminationCause) -> Vec<OutputEvent> {
        let mut events = self.flush_ops();
        let _enter = self.span.enter();
        if let Some(event) = self.intake.yield_termination(cause) {
            self.outcome = Some(InvocationOutcome::Terminated(cause.as_str()));
            events.push(event);
        }
        events
    }

    pub(super) fn fail(&mut self, stage: ErrorStage, detail: impl fmt::Display) -> Vec<OutputEvent> {
        self.fail_with(stage, detail, true)
    }

    /// Failed end: pending operations first, then the error.
    ///
    /// The error reaches the shared log only when `mirror` is set, the stage
    /// allows it and the endpoint is the provider's public API.
    pub(super) fn fail_with(
        &mut self,
        stage: ErrorStage,
        detail: impl fmt::Display,
        mirror: bool,
    ) -> Vec<OutputEvent> {
        let mut events = self.flush_ops();
        let _enter = self.span.enter();
        let message = format!(
            "{} {}: {detail}",
            self.dialect.display_name(),
            stage.issue_label()
        );
        let visible = mirror && stage.may_mirror_to_shared_log() && !self.custom_endpoint;
        if let Some(event) = self.intake.yield_error(stage, message, visible) {
            self.outcome = Some(InvocationOutcome::Failed(stage));
            events.push(event);
        }
        events
    }

    /// Silent end after the caller went away.
    pub(super) fn abort(&mut self) {
        let _enter = self.span.enter();
        tracing::debug!("invocation aborted by the caller");
        self.intake.mark_termination();
        self.outcome = Some(InvocationOutcome::Aborted);
    }

    /// Run the parser once over a complete response body.
    pub(super) fn parse_whole(
        &mut self,
        parser: &dyn ChatGenerateParse,
        body: &str,
    ) -> Vec<OutputEvent> {
        let result = {
            let _enter = self.span.enter();
            parser.parse(&mut self.transmitter, body, None)
        };
        match result {
            Ok(()) => self.terminate(TerminationCause::DispatchClose),
            Err(err) => self.fail(ErrorStage::DispatchParse, parse_detail(&err, body)),
        }
    }

    /// Process one demultiplexed batch in arrival order.
    pub(super) fn pump_batch(
        &mut self,
        parser: &dyn ChatGenerateParse,
        messages: &[WireMessage],
    ) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        for message in messages {
            self.intake.on_received_wire_message(message);
            if self.intake.is_terminated() {
                let _enter = self.span.enter();
                tracing::warn!(
                    batch_len = messages.len(),
                    "wire message after termination; dropping the rest of the batch"
                );
                break;
            }
            let WireMessage::Event { data, name } = message else {
                continue;
            };
            if is_done_sentinel(data) {
                events.extend(self.terminate(TerminationCause::EventDone));
                continue;
            }
            let result = {
                let _enter = self.span.enter();
                parser.parse(&mut self.transmitter, data, name.as_deref())
            };
            match result {
                Ok(()) => events.extend(self.drain_ops()),
                Err(err) => {
                    events.extend(self.fail(ErrorStage::DispatchParse, parse_detail(&err, data)));
                }
            }
        }
        events
    }

    /// Leave the state machine and write the completion line.
    pub(super) fn finish(&mut self) {
        let _enter = self.span.enter();
        let Some(outcome) = self.outcome else {
            tracing::error!("pipeline finished without a terminal event");
            return;
        };
        log_invocation_complete(
            &self.model,
            outcome,
            self.transmitter.last_usage(),
            self.transmitter.finish_reason(),
            self.started,
        );
    }

    fn drain_ops(&mut self) -> Vec<OutputEvent> {
        self.transmitter
            .drain_ready()
            .into_iter()
            .map(OutputEvent::Op)
            .collect()
    }

    fn flush_ops(&mut self) -> Vec<OutputEvent> {
        self.transmitter
            .flush_all()
            .into_iter()
            .map(OutputEvent::Op)
            .collect()
    }
}

fn parse_detail(err: &ParseError, payload: &str) -> String {
    let shown = truncate_for_message(payload, PAYLOAD_ECHO_LIMIT);
    let ellipsis = if shown.len() < payload.len() { "..." } else { "" };
    format!("{err}; payload: {shown}{ellipsis}")
}
