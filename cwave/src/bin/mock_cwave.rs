//! Run a simulated C-WAVE for development without hardware.
//!
//! ```text
//! mock_cwave --port 10001 --identity "CWave 2.1.0"
//! cwave_tool --ip 127.0.0.1 info
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cwave::{SimulatedCwave, StatusBits, DEFAULT_PORT};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mock_cwave")]
#[command(about = "Simulated Hübner C-WAVE listening on TCP")]
#[command(version)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Firmware string reported on `info?`
    #[arg(long, default_value = cwave::sim::DEFAULT_IDENTITY)]
    identity: String,

    /// Initial raw status field (set bits are faults)
    #[arg(long, default_value = "0")]
    status: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let sim = SimulatedCwave::bind((args.bind.as_str(), args.port))
        .with_context(|| format!("Failed to bind {}:{}", args.bind, args.port))?;
    sim.set_identity(&args.identity);
    sim.set_status_bits(StatusBits(args.status));

    info!("Simulated C-WAVE ready on {} (Ctrl-C to stop)", sim.addr());
    loop {
        std::thread::sleep(Duration::from_secs(60));
        info!("{} commands served", sim.commands().len());
    }
}
