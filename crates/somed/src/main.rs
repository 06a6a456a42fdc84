//! Runs a telemetry provider, its event publisher and two consumers on one
//! in-process bus until Ctrl-C or `--run-for` seconds elapse.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use somepack::Payload;
use somerpc::Message;
use somerun::Consumer;
use somerun::LocalBus;
use somerun::Provider;
use somerun::Publisher;
use somerun::Transport;
use somerun::config::Config;
use somerun::methods;
use somerun::telemetry::ProcFs;
use somerun::telemetry::Reading;
use somerun::telemetry::TelemetrySource;

#[derive(Parser, Debug)]
#[command(name = "somed", about = "Telemetry service with availability-gated RPC and events")]
struct Cli {
    /// TOML configuration. Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    run_for: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    somerun::logging::init(&config.logging.filter);

    let address = config.service.address();
    let bus = LocalBus::new();
    let cancel = CancellationToken::new();
    let stop_publisher = CancellationToken::new();
    let source: Arc<dyn TelemetrySource> = Arc::new(ProcFs::new(config.telemetry.proc_root.clone()));

    // server
    let server: Arc<dyn Transport> = Arc::new(bus.endpoint("server")?);
    let table = methods::standard(source.clone())?;
    let provider = Arc::new(Provider::from_config("server", &config, server.clone(), table)?);
    provider.offer().await?;
    let provider_task = provider.spawn(cancel.clone());
    let publisher_task = Publisher::from_config(&config, server, source)?.spawn(stop_publisher.clone());

    // client: every method, every group
    let client = Consumer::from_config("client", &config, Arc::new(bus.endpoint("client")?))?;
    for group in config.publisher.groups() {
        client.subscribe_on_available(address, group);
    }
    for event in &config.publisher.events {
        let metric = event.metric;
        client.on_event(address, event.event(), move |note: &Message| {
            match Reading::decode(metric, &note.payload_or_empty()) {
                Reading::Cpu(percent) => info!(consumer = "client", %metric, percent, "event"),
                Reading::Memory { used_kb, total_kb } => {
                    info!(consumer = "client", %metric, used_kb, total_kb, "event")
                }
                Reading::Unreadable(text) => warn!(consumer = "client", %metric, %text, "degraded event"),
            }
        });
    }
    client.request_on_available(address, methods::METHOD_HELLO, Some(Payload::from("Hello from client!")));
    client.request_on_available(address, methods::METHOD_CPU, None);
    client.request_on_available(address, methods::METHOD_MEMORY, None);
    let client_task = client.spawn(cancel.clone());
    client.request_service(address).await?;

    // client_2: hello only
    let client_2 = Consumer::from_config("client_2", &config, Arc::new(bus.endpoint("client_2")?))?;
    client_2.request_on_available(address, methods::METHOD_HELLO, Some(Payload::from("Hello from client_2!")));
    let client_2_task = client_2.spawn(cancel.clone());
    client_2.request_service(address).await?;

    info!(%address, "running");
    match cli.run_for {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            if let Err(err) = signal::ctrl_c().await {
                warn!(?err, "failed to install Ctrl+C handler");
            }
        }
    }

    info!("shutting down");
    // the publisher stops before the provider withdraws its events
    stop_publisher.cancel();
    let report = publisher_task.await?;
    cancel.cancel();
    provider_task.await?;
    client_task.await?;
    client_2_task.await?;
    info!(ticks = report.ticks, sent = report.sent, failed = report.failed, responses = provider.responses_sent(), "stopped");
    Ok(())
}
