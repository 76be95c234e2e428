//! `adsb-relay` - CLI for the ADS-B flight relay
//!
//! This binary polls a local ADS-B decoder and uploads one record per
//! finished flight.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use adsb_relay::cli::{Cli, Command, ConfigCommand, RunCommand};
use adsb_relay::{
    init_logging, Config, CycleProcessor, HttpSnapshotSource, HttpUploadSink, LogSink,
    ProcessorSettings, Scheduler, Snapshot, SnapshotSource, UploadSink,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match cli.command {
        Command::Run(run_cmd) => {
            let config = load_config(cli.config)?;
            handle_run(&config, &run_cmd).await
        }
        Command::Snapshot(snapshot_cmd) => {
            let config = load_config(cli.config)?;
            handle_snapshot(&config, snapshot_cmd.json).await
        }
        Command::Config(config_cmd) => handle_config(cli.config, config_cmd),
    }
}

fn load_config(path: Option<std::path::PathBuf>) -> Result<Config> {
    Config::load_from(path).context("failed to load configuration")
}

async fn handle_run(config: &Config, cmd: &RunCommand) -> Result<()> {
    let source = HttpSnapshotSource::new(config.snapshot_url(), config.request_timeout())?;

    let sink: Box<dyn UploadSink> = if cmd.dry_run {
        Box::new(LogSink)
    } else {
        let Some(endpoint) = config.upload.endpoint.clone() else {
            bail!("no upload endpoint configured; set [upload] endpoint or pass --dry-run");
        };
        Box::new(HttpUploadSink::new(
            endpoint,
            config.upload.credential.clone(),
            config.upload_timeout(),
        )?)
    };

    let token = CancellationToken::new();
    spawn_shutdown_listener(token.clone());

    let scheduler = Scheduler::from_config(config, token).with_max_cycles(cmd.max_cycles);
    let mut processor = CycleProcessor::new(ProcessorSettings::from_config(config));

    info!(
        device_id = %config.device.device_id,
        source = source.url(),
        sink = sink.name(),
        "Starting relay"
    );

    let stats = scheduler
        .run(&mut processor, &source, sink.as_ref())
        .await
        .context("relay stopped")?;

    let store = processor.store().stats();
    info!(
        cycles = stats.cycles,
        flights_uploaded = stats.flights_uploaded,
        upload_failures = stats.upload_failures,
        fetch_failures = stats.fetch_failures,
        malformed_snapshots = stats.malformed_snapshots,
        pending = store.tracking,
        "Relay stopped"
    );
    Ok(())
}

/// Cancel `token` on the first SIGINT or SIGTERM.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, finishing current cycle");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn handle_snapshot(config: &Config, json: bool) -> Result<()> {
    let source = HttpSnapshotSource::new(config.snapshot_url(), config.request_timeout())?;
    let snapshot = source
        .fetch()
        .await
        .with_context(|| format!("failed to read {}", source.url()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot_table(&snapshot);
    }
    Ok(())
}

fn print_snapshot_table(snapshot: &Snapshot) {
    println!(
        "{:<8} {:<9} {:>7} {:>6} {:>10} {:>11} {:>6}",
        "HEX", "FLIGHT", "ALT", "SEEN", "LAT", "LON", "TRACK"
    );
    for obs in &snapshot.observations {
        println!(
            "{:<8} {:<9} {:>7} {:>6.1} {:>10} {:>11} {:>6}",
            obs.mode_s_code,
            obs.flight_number,
            obs.altitude,
            obs.seen,
            format_coordinate(obs.latitude, 4),
            format_coordinate(obs.longitude, 4),
            format_coordinate(obs.track, 0),
        );
    }
    println!();
    println!(
        "{} aircraft, {} dropped, captured at {}",
        snapshot.len(),
        snapshot.dropped,
        snapshot.captured_at.to_rfc3339()
    );
}

fn format_coordinate(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

fn handle_config(path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(path)?.redacted();
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Device]");
    println!("  Device id:          {}", config.device.device_id);
    println!();
    println!("[Receiver]");
    println!("  Snapshot URL:       {}", config.snapshot_url());
    println!(
        "  Retrieval interval: {}s",
        config.receiver.retrieval_interval_secs
    );
    println!("  Request timeout:    {}s", config.receiver.request_timeout_secs);
    println!();
    println!("[Upload]");
    println!(
        "  Endpoint:           {}",
        config.upload.endpoint.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  Credential:         {}",
        config.upload.credential.as_deref().unwrap_or("(not set)")
    );
    println!("  Timeout:            {}s", config.upload.timeout_secs);
    println!("  Rollback match:     {:?}", config.upload.rollback_match);
    println!();
    println!("[Cleanup]");
    println!(
        "  Retention:          {} min",
        config.cleanup.cleanup_interval_minutes
    );
    println!();
    println!("[Runtime]");
    println!(
        "  Malformed snapshot: {:?}",
        config.runtime.on_malformed_snapshot
    );
}
