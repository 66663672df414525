//! Pipeline orchestrator.
//!
//! One [`ChatGeneratePipeline::run`] call drives a single invocation through
//! `Preparing -> Connecting -> {NonStreamingRead | StreamingPump} -> Done`
//! and is the only place deciding when the output sequence ends.

mod session;

use std::sync::Arc;

use async_stream::stream;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{FeaturesConfig, Posture};
use crate::dispatch::{DialectDispatchBuilder, Dispatch, DispatchBuilder, ProviderAccess};
use crate::error::{category_from_upstream_status, DispatchError, ErrorStage};
use crate::intake::{OutputEvent, TerminationCause, TransmitterConfig};
use crate::protocol::canonical::{ChatGenerateRequest, ModelSelector};
use crate::stream::{Demuxer, Utf8ChunkDecoder};
use crate::transport::{ByteStream, DispatchTransport};

use self::session::RunSession;

/// Upper bound on how much of a non-success response body is read.
const ERROR_BODY_LIMIT: usize = 4 * 1024;

/// Process-wide pipeline behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSettings {
    pub posture: Posture,
    pub transmitter: TransmitterConfig,
}

impl PipelineSettings {
    #[must_use]
    pub fn from_features(features: &FeaturesConfig) -> Self {
        Self {
            posture: features.posture,
            transmitter: features.transmitter(),
        }
    }
}

/// Caller-side identification, carried into logs only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub name: String,
    pub ref_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Echo the outbound body as a `DebugDispatchRequest` event (development only).
    pub debug_dispatch_request_body: bool,
}

/// Inputs of one invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub access: ProviderAccess,
    pub model: ModelSelector,
    pub request: ChatGenerateRequest,
    pub context: InvocationContext,
    pub streaming: bool,
    pub connection_options: ConnectionOptions,
}

enum PipelineState {
    Preparing,
    Connecting(Dispatch),
    NonStreamingRead(Dispatch, ByteStream),
    StreamingPump(Dispatch, ByteStream, Box<dyn Demuxer>),
    Done,
}

enum ChunkRead {
    Data(Bytes),
    Closed,
    Aborted,
    Failed(DispatchError),
}

enum BodyRead {
    Complete(Bytes),
    Aborted,
    Failed(DispatchError),
}

/// Drives invocations against a transport.
#[derive(Clone)]
pub struct ChatGeneratePipeline {
    transport: Arc<dyn DispatchTransport>,
    builder: Arc<dyn DispatchBuilder>,
    settings: PipelineSettings,
}

impl std::fmt::Debug for ChatGeneratePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatGeneratePipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatGeneratePipeline {
    /// Pipeline using the built-in dialect adapters.
    #[must_use]
    pub fn new(transport: Arc<dyn DispatchTransport>, settings: PipelineSettings) -> Self {
        Self {
            transport,
            builder: Arc::new(DialectDispatchBuilder),
            settings,
        }
    }

    #[must_use]
    pub fn with_builder(mut self, builder: Arc<dyn DispatchBuilder>) -> Self {
        self.builder = builder;
        self
    }

    #[must_use]
    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    /// Run one invocation.
    ///
    /// The returned stream yields `Start` first and, unless `cancel` fired,
    /// exactly one terminal event last. Failures never surface as Rust
    /// errors; they end the sequence with an `OutputEvent::Error`.
    pub fn run(
        &self,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> impl Stream<Item = OutputEvent> + Send + 'static {
        let transport = Arc::clone(&self.transport);
        let builder = Arc::clone(&self.builder);
        let settings = self.settings;

        stream! {
            let mut session = RunSession::new(&invocation, settings.transmitter);
            if let Some(event) = session.start() {
                yield event;
            }

            let mut state = PipelineState::Preparing;
            loop {
                state = match state {
                    PipelineState::Preparing => {
                        let built = {
                            let _enter = session.span().enter();
                            builder.build(
                                &invocation.access,
                                &invocation.model,
                                &invocation.request,
                                invocation.streaming,
                            )
                        };
                        match built {
                            Ok(dispatch) => {
                                if invocation.connection_options.debug_dispatch_request_body {
                                    if let Some(event) =
                                        session.debug_echo(&dispatch.request, settings.posture)
                                    {
                                        yield event;
                                    }
                                }
                                PipelineState::Connecting(dispatch)
                            }
                            Err(err) => {
                                for event in session.fail(ErrorStage::DispatchPrepare, err) {
                                    yield event;
                                }
                                PipelineState::Done
                            }
                        }
                    }

                    PipelineState::Connecting(dispatch) => {
                        let execute = transport
                            .execute(&dispatch.request)
                            .instrument(session.span().clone());
                        let response = tokio::select! {
                            biased;
                            () = cancel.cancelled() => Err(DispatchError::Aborted),
                            result = execute => result,
                        };
                        match response {
                            Err(err) => {
                                let mirror = !err.is_aborted();
                                for event in session.fail_with(ErrorStage::DispatchFetch, err, mirror) {
                                    yield event;
                                }
                                PipelineState::Done
                            }
                            Ok(response) if !response.status.is_success() => {
                                let status = response.status;
                                let body = read_error_body(response.body, &cancel).await;
                                let detail = describe_status(status, &body);
                                for event in session.fail(ErrorStage::DispatchFetch, detail) {
                                    yield event;
                                }
                                PipelineState::Done
                            }
                            Ok(response) => {
                                tracing::debug!(parent: session.span(), status = response.status.as_u16(), "connected");
                                match dispatch.demuxer_format.filter(|_| invocation.streaming) {
                                    Some(format) => PipelineState::StreamingPump(
                                        dispatch,
                                        response.body,
                                        format.create_demuxer(),
                                    ),
                                    None => PipelineState::NonStreamingRead(dispatch, response.body),
                                }
                            }
                        }
                    }

                    PipelineState::NonStreamingRead(dispatch, body) => {
                        match read_full_body(body, &cancel).await {
                            BodyRead::Aborted => session.abort(),
                            BodyRead::Failed(err) => {
                                for event in session.fail(ErrorStage::DispatchRead, err) {
                                    yield event;
                                }
                            }
                            BodyRead::Complete(bytes) => {
                                let text = String::from_utf8_lossy(&bytes);
                                for event in session.parse_whole(dispatch.parser.as_ref(), &text) {
                                    yield event;
                                }
                            }
                        }
                        PipelineState::Done
                    }

                    PipelineState::StreamingPump(dispatch, mut body, mut demuxer) => {
                        let mut decoder = Utf8ChunkDecoder::new();
                        while !session.is_terminated() {
                            let read = tokio::select! {
                                biased;
                                () = cancel.cancelled() => ChunkRead::Aborted,
                                chunk = body.next() => match chunk {
                                    Some(Ok(bytes)) => ChunkRead::Data(bytes),
                                    None => ChunkRead::Closed,
                                    Some(Err(err)) if err.is_aborted() || cancel.is_cancelled() => {
                                        ChunkRead::Aborted
                                    }
                                    Some(Err(err)) => ChunkRead::Failed(err),
                                },
                            };
                            match read {
                                ChunkRead::Data(bytes) => {
                                    let text = decoder.decode(&bytes);
                                    if text.is_empty() {
                                        continue;
                                    }
                                    let messages = demuxer.demux(&text);
                                    for event in session.pump_batch(dispatch.parser.as_ref(), &messages) {
                                        yield event;
                                    }
                                }
                                ChunkRead::Closed => {
                                    let tail = decoder.finish();
                                    let mut messages = if tail.is_empty() {
                                        Vec::new()
                                    } else {
                                        demuxer.demux(&tail)
                                    };
                                    messages.extend(demuxer.finish());
                                    for event in session.pump_batch(dispatch.parser.as_ref(), &messages) {
                                        yield event;
                                    }
                                    for event in session.terminate(TerminationCause::DispatchClose) {
                                        yield event;
                                    }
                                }
                                ChunkRead::Aborted => session.abort(),
                                ChunkRead::Failed(err) => {
                                    for event in session.fail(ErrorStage::DispatchRead, err) {
                                        yield event;
                                    }
                                }
                            }
                        }
                        PipelineState::Done
                    }

                    PipelineState::Done => {
                        session.finish();
                        break;
                    }
                };
            }
        }
    }
}

/// Read the whole body, racing every chunk against `cancel`.
async fn read_full_body(mut body: ByteStream, cancel: &CancellationToken) -> BodyRead {
    let mut buf = BytesMut::new();
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return BodyRead::Aborted,
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
            Some(Err(_)) if cancel.is_cancelled() => return BodyRead::Aborted,
            Some(Err(err)) if err.is_aborted() => return BodyRead::Aborted,
            Some(Err(err)) => return BodyRead::Failed(err),
            None => return BodyRead::Complete(buf.freeze()),
        }
    }
}

/// Best-effort read of an error body, capped at [`ERROR_BODY_LIMIT`].
async fn read_error_body(mut body: ByteStream, cancel: &CancellationToken) -> String {
    let mut buf = BytesMut::new();
    while buf.len() < ERROR_BODY_LIMIT {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                let take = bytes.len().min(ERROR_BODY_LIMIT - buf.len());
                buf.extend_from_slice(&bytes[..take]);
            }
            Some(Err(err)) => {
                tracing::debug!(error = %err, "error body read failed");
                break;
            }
            None => break,
        }
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

fn describe_status(status: http::StatusCode, body: &str) -> String {
    let category = category_from_upstream_status(status.as_u16()).as_str();
    if body.is_empty() {
        format!("HTTP {} ({category})", status.as_u16())
    } else {
        format!("HTTP {} ({category}): {body}", status.as_u16())
    }
}
