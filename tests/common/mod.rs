#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use bytes::Bytes;
use chatwire::dispatch::{Dialect, DispatchRequest, ProviderAccess};
use chatwire::error::DispatchError;
use chatwire::intake::OutputEvent;
use chatwire::pipeline::{
    ChatGeneratePipeline, ConnectionOptions, Invocation, InvocationContext, PipelineSettings,
};
use chatwire::protocol::canonical::{ChatGenerateRequest, GenerationOp, ModelSelector};
use chatwire::transport::{DispatchResponse, DispatchTransport};
use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// What the scripted transport answers to the next request.
pub enum Script {
    Respond {
        status: u16,
        chunks: Vec<Result<Bytes, DispatchError>>,
        /// Keep the body open after the last chunk instead of closing it.
        hang: bool,
    },
    Fail(DispatchError),
}

impl Script {
    pub fn ok(chunks: &[&[u8]]) -> Self {
        Script::Respond {
            status: 200,
            chunks: chunks
                .iter()
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                .collect(),
            hang: false,
        }
    }

    pub fn hanging(chunks: &[&[u8]]) -> Self {
        match Script::ok(chunks) {
            Script::Respond { status, chunks, .. } => Script::Respond {
                status,
                chunks,
                hang: true,
            },
            fail @ Script::Fail(_) => fail,
        }
    }
}

/// In-memory transport replaying one scripted response.
pub struct ScriptedTransport {
    script: Mutex<Option<Script>>,
    pub requests: Mutex<Vec<DispatchRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl DispatchTransport for ScriptedTransport {
    async fn execute(&self, request: &DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.script.lock().unwrap().take();
        match script {
            None => Err(DispatchError::Transport("script exhausted".to_string())),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Respond {
                status,
                chunks,
                hang,
            }) => {
                let body = stream::iter(chunks);
                let body = if hang {
                    body.chain(stream::pending()).boxed()
                } else {
                    body.boxed()
                };
                Ok(DispatchResponse {
                    status: http::StatusCode::from_u16(status).unwrap(),
                    body,
                })
            }
        }
    }
}

pub fn invocation(access: ProviderAccess, model: &str, streaming: bool) -> Invocation {
    Invocation {
        access,
        model: ModelSelector::new(model),
        request: ChatGenerateRequest::from_user_text("Say hi"),
        context: InvocationContext {
            name: "test".to_string(),
            ref_id: "ref-1".to_string(),
        },
        streaming,
        connection_options: ConnectionOptions::default(),
    }
}

pub fn openai_access() -> ProviderAccess {
    ProviderAccess::new(Dialect::OpenAi, "sk-test")
}

pub fn pipeline(transport: Arc<dyn DispatchTransport>) -> ChatGeneratePipeline {
    ChatGeneratePipeline::new(transport, PipelineSettings::default())
}

pub async fn collect(pipeline: &ChatGeneratePipeline, invocation: Invocation) -> Vec<OutputEvent> {
    pipeline
        .run(invocation, CancellationToken::new())
        .collect()
        .await
}

pub fn texts(events: &[OutputEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            OutputEvent::Op(GenerationOp::TextDelta { text }) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub fn ops(events: &[OutputEvent]) -> Vec<&GenerationOp> {
    events
        .iter()
        .filter_map(|event| match event {
            OutputEvent::Op(op) => Some(op),
            _ => None,
        })
        .collect()
}

/// Assert the lifecycle framing: one start first, one terminal event last.
pub fn assert_well_formed(events: &[OutputEvent]) {
    assert_eq!(events.first(), Some(&OutputEvent::Start), "{events:#?}");
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "{events:#?}");
    assert!(events.last().is_some_and(OutputEvent::is_terminal), "{events:#?}");
    assert_eq!(
        events.iter().filter(|e| **e == OutputEvent::Start).count(),
        1
    );
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("mock upstream addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}
