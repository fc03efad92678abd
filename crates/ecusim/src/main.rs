//! ECU bench simulator
//!
//! Transmits network-management frames and answers diagnostic requests on
//! behalf of a node that is not on the bench.
//!
//! # Usage
//!
//! Simulate the IMS on vcan0 with a case table:
//! ```bash
//! ./ecusim --interface vcan0 --node IMS --cases config/cases.json
//! ```
//!
//! With config file:
//! ```bash
//! ./ecusim --config config/ecusim.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use ecusim::config::TransportKind;
use ecusim::console::{self, Command, Reply};
use ecusim::{EcuSimConfig, Simulator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ecusim")]
#[command(about = "ECU bench simulator: NM frame scheduling and diagnostic responses")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<String>,

    /// CAN interface name
    #[arg(short, long)]
    interface: Option<String>,

    /// Simulated node, selects the diagnostic IDs (e.g. IMS, VCU)
    #[arg(short, long)]
    node: Option<String>,

    /// ECU's receive CAN ID (tester sends to this)
    #[arg(long)]
    rx_id: Option<String>,

    /// ECU's transmit CAN ID (ECU sends from this)
    #[arg(long)]
    tx_id: Option<String>,

    /// Use 29-bit diagnostic IDs
    #[arg(long)]
    extended: bool,

    /// Case table (JSON array of {"req", "res"})
    #[arg(long)]
    cases: Option<String>,

    /// Run on the in-memory mock bus instead of SocketCAN
    #[arg(long)]
    mock: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Command-line values win over the config file
    fn apply(&self, config: &mut EcuSimConfig) {
        if let Some(interface) = &self.interface {
            config.transport.interface = interface.clone();
        }
        if let Some(node) = &self.node {
            config.transport.node = Some(node.clone());
        }
        if let Some(rx_id) = &self.rx_id {
            config.transport.rx_id = Some(rx_id.clone());
        }
        if let Some(tx_id) = &self.tx_id {
            config.transport.tx_id = Some(tx_id.clone());
        }
        if self.extended {
            config.transport.extended = true;
        }
        if let Some(cases) = &self.cases {
            config.cases = cases.clone();
        }
        if self.mock {
            config.transport.kind = TransportKind::Mock;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "ecusim=debug,ecusim_transport=debug"
    } else {
        "ecusim=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from: {}", path);
            EcuSimConfig::load(path).with_context(|| format!("Failed to load config {}", path))?
        }
        None => EcuSimConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        id = %config.id,
        interface = %config.transport.interface,
        node = ?config.transport.node,
        "Starting ECU simulator"
    );

    let sim = Simulator::from_config(&config)
        .await
        .context("Failed to start simulator")?;
    sim.start().await;

    println!("{}", console::HELP);
    run_console(&sim).await?;

    sim.shutdown().await;
    info!("ECU simulator stopped");
    Ok(())
}

/// Read commands from stdin until exit, end of input or Ctrl+C
async fn run_console(sim: &Simulator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match console::execute(sim.controller(), command).await {
            Ok(Reply::Continue(message)) => println!("{}", message),
            Ok(Reply::Exit) => return Ok(()),
            Err(e) => {
                warn!(%e, "Command rejected");
                println!("{}", e);
            }
        }
    }
}
