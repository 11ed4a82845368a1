use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use veil_client::{ObserverClient, PartyLogPanel, ProcessingPanel, Subscribers};
use veil_core::{ClientEvent, HubEvent, Kind, PartyId};
use veil_engine::{EngineConfig, SimulatedEngine};
use veil_server::{PipelineDelays, ServerConfig};
use veil_settings::VeilSettings;
use veil_telemetry::{init_telemetry, with_bootstrap_logging, TelemetryConfig, TelemetryGuard};

#[derive(Parser)]
#[command(name = "veil", version, about = "Sealed-payload relay with a live observer hub")]
struct Cli {
    /// Settings file (defaults to ~/.veil/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Stream hub events to the terminal.
    Watch {
        #[arg(long)]
        url: Option<String>,
        /// Only show one party's log.
        #[arg(long)]
        party: Option<PartyId>,
    },
    /// Submit one message and wait for its verdict.
    Send {
        kind: Kind,
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The configured subscriber depends on settings, so loading warnings go
    // through a temporary one.
    let settings = with_bootstrap_logging(|| match &cli.config {
        Some(path) => veil_settings::load_settings_from_path(path),
        None => veil_settings::load_settings(),
    })
    .context("failed to load settings")?;

    let telemetry = init_telemetry(&TelemetryConfig {
        log_level: settings.logging.level.clone(),
        module_levels: Vec::new(),
        json: settings.logging.json,
    });

    match cli.command {
        Command::Serve { port } => serve(settings, port, telemetry).await,
        Command::Watch { url, party } => {
            let url = url.unwrap_or_else(|| default_url(&settings));
            watch(&url, party).await
        }
        Command::Send { kind, url } => {
            let url = url.unwrap_or_else(|| default_url(&settings));
            send(&url, kind).await
        }
    }
}

fn default_url(settings: &VeilSettings) -> String {
    format!("ws://127.0.0.1:{}/ws", settings.server.port)
}

async fn serve(
    mut settings: VeilSettings,
    port: Option<u16>,
    telemetry: TelemetryGuard,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        settings.server.port = port;
    }

    let engine = Arc::new(SimulatedEngine::new(EngineConfig {
        evaluation_latency_min: Duration::from_millis(settings.engine.evaluation_latency_min_ms),
        evaluation_latency_max: Duration::from_millis(settings.engine.evaluation_latency_max_ms),
        evaluation_timeout: settings.engine.evaluation_timeout(),
    }));

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        max_send_queue: settings.server.max_send_queue,
        heartbeat_interval: Duration::from_secs(settings.server.heartbeat_interval_secs),
        sealing_port: settings.parties.sealing_port,
        processing_port: settings.parties.processing_port,
        delays: PipelineDelays {
            sealing: settings.pipeline.sealing_delay(),
            transmission: settings.pipeline.transmission_delay(),
            evaluation_gap: settings.pipeline.evaluation_gap(),
        },
    };

    let handle = veil_server::start(config, engine, telemetry.metrics())
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "veil relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn watch(url: &str, party: Option<PartyId>) -> anyhow::Result<()> {
    let subscribers = Subscribers::new();
    let processing = ProcessingPanel::new();
    let _processing = processing.attach(&subscribers);

    let panels: Vec<Arc<PartyLogPanel>> = PartyId::ALL
        .into_iter()
        .filter(|p| party.map_or(true, |only| only == *p))
        .map(PartyLogPanel::new)
        .collect();
    let _panels: Vec<_> = panels.iter().map(|p| p.attach(&subscribers)).collect();

    let _printer = subscribers.register("printer", move |event| {
        let other_party = matches!((party, event.party_id()), (Some(only), Some(p)) if p != only);
        if other_party {
            return Ok(());
        }
        match event {
            HubEvent::LogEntry(entry) => {
                println!(
                    "[{}] {} {:<7} {}",
                    entry.party_id,
                    entry.timestamp.format("%H:%M:%S%.3f"),
                    entry.level.to_string(),
                    entry.message
                );
            }
            HubEvent::ServerStatus(status) => {
                println!("[{}] status {} :{}", status.party_id, status.state, status.listen_port);
            }
            HubEvent::ProcessingResult(_) => print!("{}", processing.render()),
            HubEvent::Error(e) => eprintln!("hub error: {}", e.message),
            _ => {}
        }
        Ok(())
    });

    let mut client = ObserverClient::connect(url, subscribers)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    tokio::select! {
        _ = client.closed() => {
            for panel in &panels {
                print!("{}", panel.render());
            }
            bail!("hub closed the connection");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl+c")?;
        }
    }
    let _ = client.close().await;
    Ok(())
}

async fn send(url: &str, kind: Kind) -> anyhow::Result<()> {
    let subscribers = Subscribers::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<bool, String>>();
    let _waiter = subscribers.register("send", move |event| {
        match event {
            HubEvent::ProcessingResult(result) => {
                let _ = tx.send(Ok(result.verdict));
            }
            HubEvent::Error(e) => {
                let _ = tx.send(Err(e.message.clone()));
            }
            _ => {}
        }
        Ok(())
    });

    let client = ObserverClient::connect(url, subscribers)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    client
        .send(&ClientEvent::encrypt(kind))
        .await
        .context("failed to submit message")?;

    let outcome = rx
        .recv()
        .await
        .context("connection closed before a verdict arrived")?;
    let _ = client.close().await;

    match outcome {
        Ok(verdict) => {
            println!("{kind} -> {verdict}");
            Ok(())
        }
        Err(message) => bail!("hub rejected the request: {message}"),
    }
}
