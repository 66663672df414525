use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use chatwire::config::{load_config, AppConfig};
use chatwire::intake::{OutputEvent, TerminationCause};
use chatwire::observability::init_tracing;
use chatwire::pipeline::{
    ChatGeneratePipeline, ConnectionOptions, Invocation, InvocationContext, PipelineSettings,
};
use chatwire::protocol::canonical::{ChatGenerateRequest, ModelSelector};
use chatwire::transport::HttpTransport;
use clap::Parser;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

/// Run one chat generation and print its events as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "chatwire")]
#[command(version)]
#[command(about = "Run one chat generation against a configured provider", long_about = None)]
struct CliArgs {
    /// Path to the YAML configuration file
    #[arg(long = "config", default_value = "config.yaml")]
    config_path: String,

    /// Provider name from the configuration
    #[arg(long)]
    provider: Option<String>,

    /// Model id; defaults to the provider's first model
    #[arg(long)]
    model: Option<String>,

    /// Request a single response body instead of a stream
    #[arg(long)]
    no_stream: bool,

    /// Echo the dispatch body before sending (development posture only)
    #[arg(long)]
    debug_body: bool,

    /// Prompt text
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
}

impl CliArgs {
    fn prompt_text(&self) -> String {
        self.prompt.join(" ")
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    if args.prompt_text().trim().is_empty() {
        eprintln!("The prompt must not be blank");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.features.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(config, args))
}

async fn run(config: AppConfig, args: CliArgs) -> ExitCode {
    let Some(provider) = config.resolve_provider(args.provider.as_deref(), args.model.as_deref())
    else {
        eprintln!(
            "No provider matches {}",
            args.provider.as_deref().unwrap_or("the configuration")
        );
        return ExitCode::FAILURE;
    };
    let Some(model_id) = args.model.clone().or_else(|| provider.models.first().cloned()) else {
        eprintln!("Provider '{}' lists no models; pass --model", provider.name);
        return ExitCode::FAILURE;
    };

    let transport = match HttpTransport::new(&config.transport) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Failed to build HTTP transport: {e}");
            return ExitCode::FAILURE;
        }
    };
    let pipeline = ChatGeneratePipeline::new(
        Arc::new(transport),
        PipelineSettings::from_features(&config.features),
    );

    let invocation = Invocation {
        access: provider.access(),
        model: ModelSelector::new(model_id),
        request: ChatGenerateRequest::from_user_text(args.prompt_text()),
        context: InvocationContext {
            name: "cli".to_string(),
            ref_id: uuid::Uuid::new_v4().to_string(),
        },
        streaming: !args.no_stream,
        connection_options: ConnectionOptions {
            debug_dispatch_request_body: args.debug_body,
        },
    };
    tracing::info!(provider = %provider.name, model = %invocation.model.id, "running invocation");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    let events = pipeline.run(invocation, cancel.clone());
    futures_util::pin_mut!(events);

    let mut failed = false;
    let mut terminated = false;
    let mut stdout = std::io::stdout().lock();
    while let Some(event) = events.next().await {
        failed |= event.error_stage().is_some();
        terminated |= event.is_terminal();
        if let Err(e) = print_event(&mut stdout, &event) {
            tracing::warn!(error = %e, "stdout closed, cancelling");
            cancel.cancel();
        }
    }
    if !terminated && cancel.is_cancelled() {
        // The pipeline ends silently on abort; close the line protocol for readers.
        let _ = print_event(
            &mut stdout,
            &OutputEvent::Termination {
                cause: TerminationCause::ClientAbort,
            },
        );
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_event(out: &mut impl Write, event: &OutputEvent) -> std::io::Result<()> {
    let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    writeln!(out, "{line}")?;
    out.flush()
}
