//! hvac-plc - soft PLC process.
//!
//! Loads the configuration and the ST program, serves the register table to the supervisory
//! system, drives the plant, and runs until Ctrl-C.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hvac_plc::plc::adapters::storage::{load_config, load_program_or_fallback};
use hvac_plc::plc::core::config::PlcConfigV1;
use hvac_plc::plc::usecase::runtime::PlcRuntime;
use log::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hvac-plc")]
#[command(about = "Run the HVAC soft PLC with Modbus TCP plant and supervisory bridges")]
struct Cli {
    /// JSON configuration file (schemaVersion 1); defaults apply when absent
    #[arg(long, default_value = "plc.json")]
    config: PathBuf,

    /// Structured Text program to execute
    #[arg(long)]
    program: Option<PathBuf>,

    /// Register server bind address, e.g. 0.0.0.0:502
    #[arg(long)]
    listen: Option<String>,

    #[arg(long)]
    plant_host: Option<String>,

    #[arg(long)]
    plant_port: Option<u16>,

    /// Scan period in milliseconds
    #[arg(long)]
    period_ms: Option<u32>,
}

impl Cli {
    fn apply(self, mut config: PlcConfigV1) -> PlcConfigV1 {
        if let Some(program) = self.program {
            config.program_path = program;
        }
        if let Some(listen) = self.listen {
            config.server.bind_addr = listen;
        }
        if let Some(host) = self.plant_host {
            config.plant.host = host;
        }
        if let Some(port) = self.plant_port {
            config.plant.port = port;
        }
        if let Some(period_ms) = self.period_ms {
            config.scan.period_ms = period_ms;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hvac_plc=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let base = load_config(&cli.config)
        .with_context(|| format!("read configuration {}", cli.config.display()))?
        .unwrap_or_default();
    let config = cli.apply(base);
    config.validate().context("invalid configuration")?;

    info!(
        "[plc][main] program={} listen={} plant={}:{} periodMs={}",
        config.program_path.display(),
        config.server.bind_addr,
        config.plant.host,
        config.plant.port,
        config.scan.period_ms
    );

    let program = load_program_or_fallback(&config.program_path);
    let plc = PlcRuntime::start(config, program)
        .await
        .context("start PLC runtime")?;

    tokio::signal::ctrl_c()
        .await
        .context("wait for Ctrl-C")?;
    info!("[plc][main] shutdown requested");

    let state = plc.shutdown().await;
    info!(
        "[plc][main] final diagnostics: {}",
        serde_json::to_string(&state).context("serialize diagnostics")?
    );
    Ok(())
}
