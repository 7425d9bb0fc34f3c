//! Command line control of a Hübner C-WAVE laser.
//!
//! Subcommands:
//! - `info`: firmware, FPGA version and serial number
//! - `status`: decoded status conditions
//! - `log`: one status log record
//! - `dial`: set a wavelength, optionally waiting for lock
//! - `shutter`, `piezo-mode`, `piezo-output`, `temperature`: query or set
//! - `mapping`: look up the crystal temperature for a wavelength
//! - `extramp`: configure the OPO ramp generator
//! - `monitor`: print the status log periodically
//! - `raw`: send an arbitrary command

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cwave::{
    CWave, ClientConfig, Condition, ExtRampMode, Log, MappingChannel, PiezoChannel, PiezoMode,
    ShutterChannel, StatusBit, TemperatureChannel,
};
use strum::IntoEnumIterator;
use tracing::info;

/// Hübner C-WAVE control tool
#[derive(Parser, Debug)]
#[command(name = "cwave_tool")]
#[command(about = "Query and control a Hübner C-WAVE tunable laser")]
#[command(version)]
struct Args {
    /// Device (or C-WAVE Control) address, overrides the config file
    #[arg(long, global = true)]
    ip: Option<String>,

    /// TCP port, overrides the config file
    #[arg(long, global = true)]
    port: Option<u16>,

    /// JSON client configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Response timeout in milliseconds, overrides the config file
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ShutterState {
    Open,
    Close,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show firmware, FPGA version and serial number
    Info,

    /// Show every status condition
    Status,

    /// Show one status log record
    Log,

    /// Dial a wavelength
    Dial {
        /// Wavelength in nm
        wavelength: f64,

        /// Treat the wavelength as the desired SHG output
        #[arg(long)]
        shg: bool,

        /// Wait for OPO and SHG lock
        #[arg(short, long)]
        wait: bool,

        /// Lock timeout in seconds
        #[arg(long, default_value = "120")]
        timeout: u64,
    },

    /// Query or set a shutter
    Shutter {
        #[arg(value_enum)]
        channel: ShutterChannel,

        #[arg(value_enum)]
        state: Option<ShutterState>,
    },

    /// Query or set a piezo loop mode
    PiezoMode {
        #[arg(value_enum)]
        channel: PiezoChannel,

        #[arg(value_enum)]
        mode: Option<PiezoMode>,
    },

    /// Query or set the manual piezo output (0-65535)
    PiezoOutput {
        #[arg(value_enum)]
        channel: PiezoChannel,

        value: Option<u16>,
    },

    /// Query or set a temperature setpoint in °C
    Temperature {
        #[arg(value_enum)]
        channel: TemperatureChannel,

        setpoint: Option<f64>,
    },

    /// Look up the mapped crystal temperature for a wavelength in nm
    Mapping {
        #[arg(value_enum)]
        channel: MappingChannel,

        wavelength: f64,
    },

    /// Configure the OPO ramp generator used in ext-ramp mode
    Extramp {
        /// Ramp period in ms
        period_ms: u32,

        #[arg(value_enum)]
        mode: ExtRampMode,

        /// Lower limit in percent of the piezo range
        lower: u8,

        /// Upper limit in percent of the piezo range
        upper: u8,
    },

    /// Print the status log periodically
    Monitor {
        /// Interval between reads in ms
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,

        /// Number of reads (0 = infinite)
        #[arg(short, long, default_value = "0")]
        count: u32,
    },

    /// Send a raw command and print the reply payload
    Raw { command: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = build_config(&args)?;

    info!("Connecting to C-WAVE at {}...", config.socket_addr());
    let mut cw = CWave::connect_with(&config)
        .with_context(|| format!("Failed to connect to {}", config.socket_addr()))?;

    match args.command {
        Command::Info => cmd_info(&mut cw),
        Command::Status => cmd_status(&mut cw),
        Command::Log => {
            print_log(&cw.get_log()?);
            Ok(())
        }
        Command::Dial {
            wavelength,
            shg,
            wait,
            timeout,
        } => cmd_dial(&mut cw, wavelength, shg, wait, timeout),
        Command::Shutter { channel, state } => cmd_shutter(&mut cw, channel, state),
        Command::PiezoMode { channel, mode } => cmd_piezo_mode(&mut cw, channel, mode),
        Command::PiezoOutput { channel, value } => cmd_piezo_output(&mut cw, channel, value),
        Command::Temperature { channel, setpoint } => cmd_temperature(&mut cw, channel, setpoint),
        Command::Mapping {
            channel,
            wavelength,
        } => {
            let temperature = cw.get_mapping_temperature(channel, wavelength)?;
            info!("{channel} mapping: {wavelength:.2} nm -> {temperature:.3} °C");
            Ok(())
        }
        Command::Extramp {
            period_ms,
            mode,
            lower,
            upper,
        } => {
            cw.set_opo_extramp_settings(period_ms, mode, lower, upper)?;
            info!("OPO ramp: {period_ms} ms {mode}, {lower}-{upper} %");
            Ok(())
        }
        Command::Monitor { interval_ms, count } => cmd_monitor(&mut cw, interval_ms, count),
        Command::Raw { command } => {
            let payload = cw.exchange_raw(&command)?;
            info!("{command} -> {payload}");
            Ok(())
        }
    }
}

fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(ip) = &args.ip {
        config.address = ip.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.response_timeout_ms = timeout_ms;
    }
    Ok(config)
}

fn print_log(log: &Log) {
    info!(
        "T[°C] opo={:.3} shg1={:.3} shg2={:.3} ref={:.3} base={:.3} fpga={:.3}",
        log.temp_opo, log.temp_shg1, log.temp_shg2, log.temp_ref, log.temp_base, log.temp_fpga
    );
    info!(
        "PD pump={} signal={} shg={} reserve={}",
        log.pd_pump, log.pd_signal, log.pd_shg, log.pd_reserve
    );
    let faults = log.status_bits.faults();
    if faults.is_empty() {
        info!("Status 0x{:08x}: all OK", log.status_bits.raw());
    } else {
        info!("Status 0x{:08x}: faults {:?}", log.status_bits.raw(), faults);
    }
}

// ==================== Info / Status ====================

fn cmd_info(cw: &mut CWave) -> Result<()> {
    info!("Firmware: {}", cw.get_firmware_version()?);
    info!("FPGA: {}", cw.get_fpga_version()?);
    info!("Serial: {}", cw.get_serial_number()?);
    info!("Pump laser enabled: {}", cw.get_laser()?);
    info!("External pump: {}", cw.get_external_pump()?);
    Ok(())
}

fn cmd_status(cw: &mut CWave) -> Result<()> {
    let status = cw.get_status_bits()?;
    for bit in StatusBit::iter() {
        let label = match status.condition(bit) {
            Condition::Ok => "OK",
            Condition::Fault => "FAULT",
        };
        info!("{:>14}: {}", bit.to_string(), label);
    }
    Ok(())
}

// ==================== Wavelength ====================

fn cmd_dial(cw: &mut CWave, wavelength: f64, shg: bool, wait: bool, timeout: u64) -> Result<()> {
    cw.dial(wavelength, shg)?;
    info!("Dialed {wavelength:.2} nm (SHG: {shg})");

    if wait {
        info!("Waiting up to {timeout} s for lock...");
        cw.wait_dial_done(Duration::from_secs(timeout), Duration::from_secs(1))?;
        info!("OPO and SHG locked");
    }
    Ok(())
}

// ==================== Settings ====================

fn cmd_shutter(cw: &mut CWave, channel: ShutterChannel, state: Option<ShutterState>) -> Result<()> {
    if let Some(state) = state {
        cw.set_shutter(channel, matches!(state, ShutterState::Open))?;
    }
    let open = cw.get_shutter(channel)?;
    info!("Shutter {channel}: {}", if open { "open" } else { "closed" });
    Ok(())
}

fn cmd_piezo_mode(cw: &mut CWave, channel: PiezoChannel, mode: Option<PiezoMode>) -> Result<()> {
    if let Some(mode) = mode {
        cw.set_piezo_mode(channel, mode)?;
    }
    info!("Piezo {channel}: {}", cw.get_piezo_mode(channel)?);
    Ok(())
}

fn cmd_piezo_output(cw: &mut CWave, channel: PiezoChannel, value: Option<u16>) -> Result<()> {
    if let Some(value) = value {
        cw.set_piezo_manual_output(channel, value)?;
    }
    info!(
        "Piezo {channel} manual output: {}",
        cw.get_piezo_manual_output(channel)?
    );
    Ok(())
}

fn cmd_temperature(
    cw: &mut CWave,
    channel: TemperatureChannel,
    setpoint: Option<f64>,
) -> Result<()> {
    if let Some(setpoint) = setpoint {
        cw.set_temperature_setpoint(channel, setpoint)?;
    }
    info!(
        "Temperature setpoint {channel}: {:.3} °C",
        cw.get_temperature_setpoint(channel)?
    );
    Ok(())
}

// ==================== Monitor ====================

fn cmd_monitor(cw: &mut CWave, interval_ms: u64, count: u32) -> Result<()> {
    let interval = Duration::from_millis(interval_ms);
    let mut reads = 0u32;
    loop {
        print_log(&cw.get_log()?);
        reads += 1;
        if count != 0 && reads >= count {
            return Ok(());
        }
        std::thread::sleep(interval);
    }
}
