//! Simulated C-WAVE speaking the line protocol over TCP.
//!
//! The simulator keeps a map of register values and answers the way the
//! firmware does:
//!
//! ```text
//! galvo?        -> galvo:0
//! galvo:1200    -> galvo:1200        (stored)
//! nothing?      -> ?nothing
//! opt_stop      -> opt_stop
//! ```
//!
//! `info?`, `get_log?` and `mapping_<ch>?<lambda>` are computed from the
//! simulator state rather than the register map.
//!
//! Like the hardware, it serves one client at a time. The server runs on a
//! background thread until the [`SimulatedCwave`] is dropped.

use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::codec::{encode_log, to_fixed, TEMPERATURE_SCALE, WAVELENGTH_SCALE};
use crate::types::{
    Log, MappingChannel, PiezoChannel, ShutterChannel, StatusBits, StepperChannel,
    TemperatureChannel,
};

/// Identity reported by default on `info?`.
pub const DEFAULT_IDENTITY: &str = "CWave 2.0 simulated";

/// How often the server thread checks for shutdown and injected lines.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Linear wavelength to crystal temperature mapping, `offset + slope * lambda`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappingLine {
    /// Temperature in °C at 0 nm
    pub offset: f64,
    /// °C per nm
    pub slope: f64,
}

impl MappingLine {
    pub fn temperature(&self, wavelength: f64) -> f64 {
        self.offset + self.slope * wavelength
    }
}

#[derive(Debug)]
struct SimState {
    identity: String,
    registers: HashMap<String, String>,
    log: Log,
    mappings: HashMap<MappingChannel, MappingLine>,
    stray: VecDeque<String>,
    muted: bool,
    commands: Vec<String>,
}

impl SimState {
    fn new() -> Self {
        let mut registers = HashMap::new();
        let mut reg = |name: String, value: &str| {
            registers.insert(name, value.to_string());
        };

        reg("opo_lambda".into(), "110000");
        reg("opo_rlambda".into(), "0");
        reg("thicketa_rel_hr".into(), "0");
        reg("regeta_off".into(), "32768");
        reg("galvo".into(), "0");
        reg("laser_en".into(), "1");
        reg("laser_exist".into(), "1");
        reg("mirror".into(), "0");
        reg("info_fpga".into(), "21");
        reg("uniqueid".into(), "3512867214");
        reg("regopo_extramp".into(), "100:0:0:100");
        for ch in StepperChannel::iter() {
            reg(format!("{ch}_pos_i"), "40");
        }
        for ch in PiezoChannel::iter() {
            reg(format!("reg{ch}_on"), "2");
        }
        for ch in [PiezoChannel::Opo, PiezoChannel::Shg] {
            reg(format!("reg{ch}_out"), "0");
        }
        for ch in ShutterChannel::iter() {
            reg(format!("shtter_{ch}"), "0");
        }
        for ch in TemperatureChannel::iter() {
            reg(format!("t{ch}_set"), "45000");
        }

        let mappings = HashMap::from([
            (
                MappingChannel::Opo,
                MappingLine {
                    offset: -12.0,
                    slope: 0.05,
                },
            ),
            (
                MappingChannel::Shg,
                MappingLine {
                    offset: 20.0,
                    slope: 0.04,
                },
            ),
        ]);

        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            registers,
            log: Log {
                temp_opo: 45.0,
                temp_shg1: 45.0,
                temp_shg2: 45.0,
                temp_ref: 45.0,
                temp_base: 25.0,
                temp_fpga: 40.0,
                pd_pump: 3000,
                pd_signal: 1500,
                pd_shg: 600,
                pd_reserve: 0,
                status_bits: StatusBits(0),
            },
            mappings,
            stray: VecDeque::new(),
            muted: false,
            commands: Vec::new(),
        }
    }

    /// Reply line for one command, or `None` when muted.
    fn respond(&mut self, command: &str) -> Option<String> {
        self.commands.push(command.to_string());
        if self.muted {
            return None;
        }
        Some(self.reply(command))
    }

    fn reply(&mut self, command: &str) -> String {
        if let Some((name, argument)) = command.split_once('?') {
            return match name {
                "info" => format!("info:{}", self.identity),
                "get_log" => match encode_log(&self.log) {
                    Ok(log) => format!("get_log:{log}"),
                    Err(_) => "?get_log".to_string(),
                },
                _ if !argument.is_empty() => self.mapping_reply(name, argument),
                _ => match self.registers.get(name) {
                    Some(value) => format!("{name}:{value}"),
                    None => format!("?{name}"),
                },
            };
        }

        if let Some((name, value)) = command.split_once(':') {
            return match self.registers.get_mut(name) {
                Some(slot) => {
                    *slot = value.to_string();
                    command.to_string()
                }
                None => format!("?{name}"),
            };
        }

        match command {
            "opt_stop" | "regeta_catch" => command.to_string(),
            _ => format!("?{command}"),
        }
    }

    fn mapping_reply(&self, name: &str, argument: &str) -> String {
        let line = name
            .strip_prefix("mapping_")
            .and_then(|ch| ch.parse::<MappingChannel>().ok())
            .and_then(|ch| self.mappings.get(&ch));
        let lambda = argument.parse::<i64>().ok();

        match (line, lambda) {
            (Some(line), Some(lambda)) => {
                let temperature = line.temperature(lambda as f64 / WAVELENGTH_SCALE);
                match to_fixed(temperature, TEMPERATURE_SCALE) {
                    Ok(millidegrees) => format!("{name}?{lambda}:{millidegrees}"),
                    Err(_) => format!("?{name}"),
                }
            }
            _ => format!("?{name}"),
        }
    }
}

/// A simulated device listening on a local TCP port.
///
/// # Example
///
/// ```no_run
/// use cwave::{CWave, SimulatedCwave};
///
/// let sim = SimulatedCwave::start()?;
/// let mut cw = CWave::new();
/// cw.connect(sim.addr())?;
/// cw.dial(1100.0, false)?;
/// assert_eq!(sim.register("opo_lambda").as_deref(), Some("110000"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct SimulatedCwave {
    addr: SocketAddr,
    state: Arc<Mutex<SimState>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedCwave {
    /// Start on an ephemeral loopback port.
    pub fn start() -> std::io::Result<Self> {
        Self::bind("127.0.0.1:0")
    }

    /// Start listening on `addr`.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let state = Arc::new(Mutex::new(SimState::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let state = Arc::clone(&state);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("cwave-sim".to_string())
                .spawn(move || serve(listener, state, shutdown))?
        };

        info!("Simulated C-WAVE listening on {addr}");
        Ok(Self {
            addr,
            state,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    /// Change the firmware string reported on `info?`.
    pub fn set_identity(&self, identity: &str) {
        self.state().identity = identity.to_string();
    }

    pub fn set_log(&self, log: Log) {
        self.state().log = log;
    }

    pub fn log(&self) -> Log {
        self.state().log
    }

    /// Replace the status field reported in the log.
    pub fn set_status_bits(&self, bits: StatusBits) {
        self.state().log.status_bits = bits;
    }

    /// Create or overwrite a register.
    pub fn set_register(&self, name: &str, value: &str) {
        self.state()
            .registers
            .insert(name.to_string(), value.to_string());
    }

    pub fn register(&self, name: &str) -> Option<String> {
        self.state().registers.get(name).cloned()
    }

    pub fn set_mapping(&self, channel: MappingChannel, line: MappingLine) {
        self.state().mappings.insert(channel, line);
    }

    /// Queue an unsolicited line, sent to the client as soon as possible.
    pub fn inject_stray(&self, line: &str) {
        self.state().stray.push_back(line.to_string());
    }

    /// While muted, commands are recorded but never answered.
    pub fn set_muted(&self, muted: bool) {
        self.state().muted = muted;
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }
}

impl Drop for SimulatedCwave {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Simulator thread panicked");
            }
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn serve(listener: TcpListener, state: Arc<Mutex<SimState>>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Simulator client connected: {peer}");
                if let Err(e) = serve_client(stream, &state, &shutdown) {
                    warn!("Simulator client error: {e}");
                }
                debug!("Simulator client disconnected: {peer}");
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!("Simulator accept failed: {e}");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn serve_client(
    mut stream: TcpStream,
    state: &Mutex<SimState>,
    shutdown: &AtomicBool,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(POLL_INTERVAL))?;
    stream.set_nodelay(true)?;

    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 256];

    while !shutdown.load(Ordering::Relaxed) {
        let stray: Vec<String> = lock(state).stray.drain(..).collect();
        for line in stray {
            stream.write_all(format!("{line}\r").as_bytes())?;
        }

        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                while let Some(end) = pending.iter().position(|&b| b == b'\r' || b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=end).collect();
                    let command = String::from_utf8_lossy(&line[..end]).into_owned();
                    if command.is_empty() {
                        continue;
                    }
                    let reply = lock(state).respond(&command);
                    debug!("Simulator: {command:?} -> {reply:?}");
                    if let Some(reply) = reply {
                        stream.write_all(format!("{reply}\r").as_bytes())?;
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CwaveError;
    use crate::transport::Connection;

    fn connect(sim: &SimulatedCwave) -> Connection {
        let mut conn = Connection::new();
        conn.connect(sim.addr()).unwrap();
        conn
    }

    #[test]
    fn test_identity_and_registers() {
        let sim = SimulatedCwave::start().unwrap();
        let mut conn = connect(&sim);

        assert_eq!(conn.exchange("info?").unwrap(), DEFAULT_IDENTITY);
        assert_eq!(conn.exchange("galvo?").unwrap(), "0");
        assert_eq!(conn.exchange("galvo:1200").unwrap(), "1200");
        assert_eq!(conn.exchange("galvo?").unwrap(), "1200");
        assert_eq!(sim.register("galvo").as_deref(), Some("1200"));
    }

    #[test]
    fn test_unknown_register_fails() {
        let sim = SimulatedCwave::start().unwrap();
        let mut conn = connect(&sim);

        assert!(matches!(
            conn.exchange("nothing?"),
            Err(CwaveError::CommandFailed { .. })
        ));
        assert!(matches!(
            conn.exchange("nothing:1"),
            Err(CwaveError::CommandFailed { .. })
        ));
        assert!(matches!(
            conn.exchange("jump"),
            Err(CwaveError::CommandFailed { .. })
        ));
        assert_eq!(conn.exchange("opt_stop").unwrap(), "");
    }

    #[test]
    fn test_multi_value_set_is_stored_whole() {
        let sim = SimulatedCwave::start().unwrap();
        let mut conn = connect(&sim);

        assert_eq!(
            conn.exchange("regopo_extramp:100:1:20:70").unwrap(),
            "100:1:20:70"
        );
        assert_eq!(sim.register("regopo_extramp").as_deref(), Some("100:1:20:70"));
    }

    #[test]
    fn test_log_reflects_status_bits() {
        let sim = SimulatedCwave::start().unwrap();
        sim.set_status_bits(StatusBits(0b110_0000));
        let mut conn = connect(&sim);

        let payload = conn.exchange("get_log?").unwrap();
        assert_eq!(payload.split(':').count(), Log::FIELD_COUNT);
        assert!(payload.ends_with(":96"));
    }

    #[test]
    fn test_mapping_reply() {
        let sim = SimulatedCwave::start().unwrap();
        sim.set_mapping(
            MappingChannel::Opo,
            MappingLine {
                offset: 0.0,
                slope: 0.04,
            },
        );
        let mut conn = connect(&sim);

        // 1100 nm * 0.04 = 44 °C
        assert_eq!(
            conn.exchange("mapping_opo?110000").unwrap(),
            "110000:44000"
        );
        assert!(conn.exchange("mapping_xyz?110000").is_err());
    }

    #[test]
    fn test_stray_line_is_flushed() {
        let sim = SimulatedCwave::start().unwrap();
        let mut conn = connect(&sim);

        sim.inject_stray("laser_en:1");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(conn.exchange("galvo?").unwrap(), "0");
    }

    #[test]
    fn test_muted_times_out_and_records() {
        let sim = SimulatedCwave::start().unwrap();
        let mut conn = connect(&sim);
        conn.set_response_timeout(Duration::from_millis(100)).unwrap();

        sim.set_muted(true);
        assert!(matches!(
            conn.exchange("galvo?"),
            Err(CwaveError::Timeout { .. })
        ));
        sim.set_muted(false);
        assert_eq!(conn.exchange("galvo?").unwrap(), "0");
        assert_eq!(sim.commands(), vec!["galvo?", "galvo?"]);
    }

    #[test]
    fn test_serves_reconnecting_clients() {
        let sim = SimulatedCwave::start().unwrap();

        let mut first = connect(&sim);
        assert_eq!(first.exchange("mirror:1").unwrap(), "1");
        first.disconnect();

        let mut second = connect(&sim);
        assert_eq!(second.exchange("mirror?").unwrap(), "1");
    }
}
