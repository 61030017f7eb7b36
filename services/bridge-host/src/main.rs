mod demo_catalog;
mod telemetry_gen;

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bridge_orchestrator::{config, Orchestrator};
use clap::Parser;
use tracing::{info, warn};

use telemetry_gen::TelemetryGenerator;

const DEFAULT_CONFIG_TOML: &str = "schema_version = 1\n";

#[derive(Parser)]
#[command(name = "bridge-host", version, about = "Demo simulator host driving the aerofly bridge")]
struct Cli {
    /// Path to a bridge.toml config file. Falls back to built-in defaults
    /// (schema_version = 1, all other fields default) if not found.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Host tick rate, in Hz.
    #[arg(long, default_value_t = 50)]
    tick_hz: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), tick_hz = cli.tick_hz, "bridge-host starting");

    let config = match &cli.config {
        Some(path) => match config::load_config_from_path(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => {
            warn!("no --config given, using built-in defaults");
            config::load_config_from_str(DEFAULT_CONFIG_TOML).expect("built-in default config is valid")
        }
    };

    let specs = demo_catalog::sample_specs();
    let mut orchestrator = match Orchestrator::on_load(config, &specs) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("failed to start bridge: {e}");
            std::process::exit(1);
        }
    };
    info!("bridge orchestrator loaded, transports listening");

    let names: Vec<&'static str> = specs.iter().map(|(name, ..)| *name).collect();
    let generator = TelemetryGenerator::new(names);

    let tick_period = Duration::from_secs_f64(1.0 / f64::from(cli.tick_hz.max(1)));
    let mut ticker = tokio::time::interval(tick_period);
    let start = Instant::now();
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_us = now_micros();
                let frame = generator.frame_for_tick(tick);
                let command_frame = orchestrator.on_update(&frame, now_us, bridge_orchestrator::DEFAULT_OUTBOUND_COMMAND_CAP_BYTES);
                if !command_frame.is_empty() {
                    apply_commands_to_host(&command_frame);
                }
                tick += 1;
                if tick % (u64::from(cli.tick_hz) * 10) == 0 {
                    let snapshot = orchestrator.diagnostics();
                    info!(?snapshot, elapsed_s = start.elapsed().as_secs(), "bridge-host heartbeat");
                }
            }
            () = shutdown_signal() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    orchestrator.on_unload();
    info!("bridge-host shut down gracefully");
}

/// In a real simulator host this is where the returned command frame would
/// be applied to the actual flight model; here it is only logged.
fn apply_commands_to_host(command_frame: &[u8]) {
    match bridge_core::codec::decode_command_frame(command_frame) {
        Ok(commands) => {
            for cmd in commands {
                info!(id = format!("{:016x}", cmd.id), value = cmd.value, "applying command to host");
            }
        }
        Err(e) => warn!(error = %e, "received malformed command frame from orchestrator"),
    }
}

fn now_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_micros() as u64
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received Ctrl+C"); },
        () = terminate => { info!("received SIGTERM"); },
    }
}
