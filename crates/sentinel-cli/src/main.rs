mod config;
mod logging;
mod positioning;
mod render;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use config::Config;
use positioning::StaticPositioning;
use sentinel_core::{
    BtleRadio, EventBus, LocationPayload, LocationSource, Sentinel, SentinelEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Share your location with nearby Sentinel devices over Bluetooth LE", long_about = None)]
#[command(version)]
struct Cli {
    /// Print events and reports as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan for nearby devices
    Scan {
        /// Scan window in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Scan, then push the current position to every Sentinel device found
    Share {
        /// Scan window in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Scan and share after the grace period, then stay active until Ctrl-C
    Emergency,
    /// Print the current position fix
    Locate,
    /// Decode a received SENTINEL_LOCATION line
    Decode { line: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    logging::init_logging(config.log_format);

    let positioning = Arc::new(StaticPositioning::new(
        config.position.fix,
        config.position.permission,
    ));

    match cli.command {
        Command::Decode { line } => decode(&line, cli.json),
        Command::Locate => locate(positioning, cli.json).await,
        Command::Scan { duration } => {
            let engine = open_engine(positioning, &config).await?;
            let printer = render::spawn_event_printer(engine.subscribe(), cli.json);
            let scan_duration = duration.map(Duration::from_secs);
            scan(&engine, scan_duration).await?;
            engine.shutdown().await;
            printer.abort();
            Ok(())
        }
        Command::Share { duration } => {
            let engine = open_engine(positioning, &config).await?;
            let printer = render::spawn_event_printer(engine.subscribe(), cli.json);
            if let Err(e) = engine.refresh_location().await {
                warn!(error = %e, "Sharing without a fresh position");
            }
            scan(&engine, duration.map(Duration::from_secs)).await?;
            let report = engine.share_with_all_sentinel_peers().await;
            render::print_report(&report, cli.json)?;
            engine.shutdown().await;
            printer.abort();
            Ok(())
        }
        Command::Emergency => {
            let engine = open_engine(positioning, &config).await?;
            let printer = render::spawn_event_printer(engine.subscribe(), cli.json);
            emergency(&engine, cli.json).await?;
            engine.shutdown().await;
            printer.abort();
            Ok(())
        }
    }
}

async fn open_engine(positioning: Arc<StaticPositioning>, config: &Config) -> anyhow::Result<Sentinel> {
    let radio = BtleRadio::new()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("Bluetooth is not available")?;
    Ok(Sentinel::new(
        Arc::new(radio),
        positioning,
        config.engine.clone(),
    ))
}

/// Run one scan session to completion
async fn scan(engine: &Sentinel, duration: Option<Duration>) -> anyhow::Result<()> {
    let mut events = engine.subscribe();
    let start = match duration {
        Some(duration) => engine.start_scan_for(duration).await?,
        None => engine.start_scan().await?,
    };
    info!(session_id = %start.session().session_id, "Scanning");

    wait_for_scan_end(&mut events).await;
    let peers = engine.discovered_peers().await;
    let sentinel_count = peers.iter().filter(|peer| peer.is_sentinel_peer).count();
    info!(found = peers.len(), sentinel = sentinel_count, "Scan complete");
    Ok(())
}

async fn wait_for_scan_end(events: &mut broadcast::Receiver<SentinelEvent>) {
    loop {
        match events.recv().await {
            Ok(SentinelEvent::ScanStateChanged {
                scanning: false, ..
            }) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn emergency(engine: &Sentinel, json: bool) -> anyhow::Result<()> {
    if let Err(e) = engine.refresh_location().await {
        warn!(error = %e, "No position yet, peers will be told so");
    }
    if let Err(e) = engine.start_location_updates().await {
        warn!(error = %e, "Continuous location updates unavailable");
    }

    let activation = engine.activate_emergency_mode().await?;
    if let Some(report) = activation.share_report().await {
        render::print_report(&report, json)?;
    }

    info!("Emergency mode active, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    engine.deactivate_emergency_mode().await;
    Ok(())
}

async fn locate(positioning: Arc<StaticPositioning>, json: bool) -> anyhow::Result<()> {
    let location = LocationSource::new(positioning, EventBus::default());
    let fix = location
        .refresh_location()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    if json {
        println!("{}", serde_json::to_string(&fix)?);
    } else {
        println!(
            "{:.6}, {:.6} at {}",
            fix.latitude,
            fix.longitude,
            fix.timestamp.to_rfc3339()
        );
    }
    Ok(())
}

fn decode(line: &str, json: bool) -> anyhow::Result<()> {
    let payload = LocationPayload::decode(line)?;
    if json {
        println!("{}", serde_json::to_string(&payload)?);
        return Ok(());
    }

    let sent_at = Utc
        .timestamp_millis_opt(payload.epoch_millis)
        .single()
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| payload.epoch_millis.to_string());
    println!(
        "{:.6}, {:.6} sent at {}",
        payload.latitude, payload.longitude, sent_at
    );
    Ok(())
}
