mod common;

use std::sync::Arc;

use bytes::Bytes;
use chatwire::dispatch::{
    ChatGenerateParse, Dispatch, DispatchBuilder, DispatchRequest, ProviderAccess,
};
use chatwire::error::{DispatchError, ErrorStage, ParseError};
use chatwire::intake::{OutputEvent, PartTransmitter, TerminationCause};
use chatwire::protocol::canonical::{ChatGenerateRequest, GenerationOp, ModelSelector, StopReason};
use chatwire::stream::DemuxerFormat;
use common::{
    assert_well_formed, collect, invocation, openai_access, ops, pipeline, texts, Script,
    ScriptedTransport,
};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

/// Emits the body as text, then fails when it contains `FAIL`.
struct PartialParser;

impl ChatGenerateParse for PartialParser {
    fn parse(
        &self,
        tx: &mut PartTransmitter,
        payload: &str,
        _event_name: Option<&str>,
    ) -> Result<(), ParseError> {
        let (head, tail) = payload.split_once("FAIL").unwrap_or((payload, ""));
        tx.append_text(head);
        if payload.contains("FAIL") {
            return Err(ParseError::Schema(format!("trailing {tail}")));
        }
        Ok(())
    }
}

struct PartialBuilder {
    demuxer_format: Option<DemuxerFormat>,
}

impl DispatchBuilder for PartialBuilder {
    fn build(
        &self,
        _access: &ProviderAccess,
        _model: &ModelSelector,
        _request: &ChatGenerateRequest,
        _streaming: bool,
    ) -> Result<Dispatch, DispatchError> {
        Ok(Dispatch {
            request: DispatchRequest {
                url: url::Url::parse("http://127.0.0.1:1/generate").unwrap(),
                method: http::Method::POST,
                headers: http::HeaderMap::new(),
                body: Bytes::from_static(b"{}"),
            },
            demuxer_format: self.demuxer_format,
            parser: Box::new(PartialParser),
        })
    }
}

#[tokio::test]
async fn test_not_json_body_is_parse_error_with_raw_body() {
    let transport = ScriptedTransport::new(Script::ok(&[b"not-json"]));
    let events = collect(&pipeline(transport), invocation(openai_access(), "gpt-4o-mini", false)).await;
    assert_eq!(events.len(), 2, "{events:?}");
    assert_eq!(events[0], OutputEvent::Start);
    let OutputEvent::Error {
        stage,
        message,
        visible_to_shared_log,
    } = &events[1]
    else {
        panic!("expected an error, got {events:?}");
    };
    assert_eq!(*stage, ErrorStage::DispatchParse);
    assert!(message.contains("not-json"), "{message}");
    assert!(*visible_to_shared_log);
}

#[tokio::test]
async fn test_body_read_failure() {
    let transport = ScriptedTransport::new(Script::Respond {
        status: 200,
        chunks: vec![
            Ok(Bytes::from_static(b"{\"choices\":")),
            Err(DispatchError::Transport("unexpected EOF".to_string())),
        ],
        hang: false,
    });
    let events = collect(&pipeline(transport), invocation(openai_access(), "gpt-4o-mini", false)).await;
    assert_eq!(
        events,
        vec![
            OutputEvent::Start,
            OutputEvent::Error {
                stage: ErrorStage::DispatchRead,
                message: "OpenAI connection issue: Transport error: unexpected EOF".to_string(),
                visible_to_shared_log: false,
            },
        ]
    );
}

#[tokio::test]
async fn test_whole_openai_body() {
    let body = br#"{
        "id": "chatcmpl_mock",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": "Hello there"}, "finish_reason": "stop"}
        ],
        "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
    }"#;
    // Split mid-body: the whole body is parsed once after the read completes.
    let (first, second) = body.split_at(40);
    let transport = ScriptedTransport::new(Script::ok(&[first, second]));
    let events = collect(&pipeline(transport), invocation(openai_access(), "gpt-4o-mini", false)).await;
    assert_well_formed(&events);
    assert_eq!(texts(&events), "Hello there");
    assert!(ops(&events).contains(&&GenerationOp::FinishReason {
        reason: StopReason::EndOfTurn
    }));
    assert_eq!(
        events.last(),
        Some(&OutputEvent::Termination {
            cause: TerminationCause::DispatchClose
        })
    );
}

#[tokio::test]
async fn test_partial_success_keeps_output_before_error() {
    let transport = ScriptedTransport::new(Script::ok(&[b"partial answerFAIL!"]));
    let pipeline = pipeline(transport).with_builder(Arc::new(PartialBuilder {
        demuxer_format: None,
    }));
    let events = collect(&pipeline, invocation(openai_access(), "m", false)).await;
    assert_well_formed(&events);
    assert_eq!(events.len(), 3, "{events:?}");
    assert_eq!(events[1], OutputEvent::Op(GenerationOp::text_delta("partial answer")));
    assert_eq!(events[2].error_stage(), Some(ErrorStage::DispatchParse));
}

#[tokio::test]
async fn test_adapter_without_stream_support_reads_whole_body() {
    let transport = ScriptedTransport::new(Script::ok(&[b"data: whole", b" body"]));
    let pipeline = pipeline(transport).with_builder(Arc::new(PartialBuilder {
        demuxer_format: None,
    }));
    let events = collect(&pipeline, invocation(openai_access(), "m", true)).await;
    assert_eq!(
        events,
        vec![
            OutputEvent::Start,
            OutputEvent::Op(GenerationOp::text_delta("data: whole body")),
            OutputEvent::Termination {
                cause: TerminationCause::DispatchClose
            },
        ]
    );
}

#[tokio::test]
async fn test_cancellation_during_body_read_is_silent() {
    let transport = ScriptedTransport::new(Script::hanging(&[b"{\"choices\":"]));
    let pipeline = pipeline(transport);
    let cancel = CancellationToken::new();
    let mut stream = Box::pin(pipeline.run(
        invocation(openai_access(), "gpt-4o-mini", false),
        cancel.clone(),
    ));

    assert_eq!(stream.next().await, Some(OutputEvent::Start));
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let rest: Vec<_> = stream.collect().await;
    canceller.await.unwrap();
    assert!(rest.is_empty(), "{rest:?}");
}

#[tokio::test]
async fn test_error_status_on_custom_endpoint_is_not_mirrored() {
    let transport = ScriptedTransport::new(Script::Respond {
        status: 503,
        chunks: vec![Ok(Bytes::from_static(b"  upstream overloaded \n"))],
        hang: false,
    });
    let access = openai_access().with_base_url("http://10.0.0.5:8080/v1");
    let events = collect(&pipeline(transport), invocation(access, "gpt-4o-mini", false)).await;
    assert_eq!(
        events.last(),
        Some(&OutputEvent::Error {
            stage: ErrorStage::DispatchFetch,
            message: "OpenAI service issue: HTTP 503 (server error): upstream overloaded".to_string(),
            visible_to_shared_log: false,
        })
    );
}
