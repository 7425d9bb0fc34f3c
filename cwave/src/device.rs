//! Hübner C-WAVE tunable laser driver
//!
//! This module provides a high-level interface to the C-WAVE continuous-wave
//! OPO laser: wavelength dialing, shutters, piezo control loops, temperature
//! setpoints and the status log.
//!
//! # Overview
//!
//! - **Wavelength**: [`dial`](CWave::dial), [`get_dial_done`](CWave::get_dial_done),
//!   [`wait_dial_done`](CWave::wait_dial_done)
//! - **Piezo loops**: [`set_piezo_mode`](CWave::set_piezo_mode),
//!   [`set_piezo_manual_output`](CWave::set_piezo_manual_output),
//!   [`set_opo_extramp_settings`](CWave::set_opo_extramp_settings)
//! - **Temperatures**: [`set_temperature_setpoint`](CWave::set_temperature_setpoint),
//!   [`get_mapping_temperature`](CWave::get_mapping_temperature)
//! - **Status**: [`get_log`](CWave::get_log), [`test_status_bits`](CWave::test_status_bits)
//!
//! Every method is at most one blocking request/response round trip, except
//! [`wait_dial_done`](CWave::wait_dial_done) which polls. Nothing is retried.
//!
//! # Units
//!
//! Wavelengths are in nm and temperatures in °C at this API. They are
//! converted to the device's integer registers (0.01 nm, 0.001 °C) here.
//!
//! # Example: Dial a Wavelength
//!
//! ```no_run
//! use cwave::{CWave, ExtRampMode, PiezoChannel, PiezoMode};
//! use std::time::Duration;
//!
//! let mut cw = CWave::new();
//! cw.connect_ip("192.168.202.22")?;
//!
//! // IR 1100 nm with SHG requested for 550 nm
//! cw.dial(1100.0, true)?;
//! std::thread::sleep(Duration::from_secs(3));
//! cw.wait_dial_done(Duration::from_secs(120), Duration::from_secs(1))?;
//!
//! // Scan the OPO with the internal signal generator: 100 ms triangle, 20-70 %
//! cw.set_opo_extramp_settings(100, ExtRampMode::Triangle, 20, 70)?;
//! cw.set_piezo_mode(PiezoChannel::Opo, PiezoMode::ExtRamp)?;
//! # Ok::<(), cwave::CwaveError>(())
//! ```

use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::codec::{
    decode, decode_scaled, to_fixed, Command, Decode, ETALON_SCALE, TEMPERATURE_SCALE,
    WAVELENGTH_SCALE,
};
use crate::config::ClientConfig;
use crate::error::{CwaveError, CwaveResult};
use crate::transport::{Connection, Link, DEFAULT_PORT};
use crate::types::{
    ExtRampMode, Log, MappingChannel, PiezoChannel, PiezoMode, ShutterChannel, StatusBit,
    StatusBits, StepperChannel, TemperatureChannel,
};

/// Every genuine C-WAVE firmware string starts with this.
pub const SIGNATURE_PREFIX: &str = "CWave ";

/// Conditions that must be OK for a dial to count as finished.
const DIAL_DONE_BITS: [StatusBit; 2] = [StatusBit::OpoLock, StatusBit::ShgLock];

/// High-level driver for the C-WAVE.
///
/// Generic over the [`Link`] it talks through; the default is a TCP
/// [`Connection`]. The link is owned exclusively by this instance.
///
/// # Example
///
/// ```no_run
/// use cwave::{CWave, ShutterChannel};
///
/// let mut cw = CWave::new();
/// cw.connect("192.168.202.22:10001")?;
/// cw.set_shutter(ShutterChannel::ShgOut, true)?;
/// println!("{:?}", cw.get_log()?);
/// # Ok::<(), cwave::CwaveError>(())
/// ```
#[derive(Debug)]
pub struct CWave<L: Link = Connection> {
    link: L,
}

impl Default for CWave<Connection> {
    fn default() -> Self {
        Self::new()
    }
}

impl CWave<Connection> {
    /// Create a disconnected handle.
    pub fn new() -> Self {
        Self::with_link(Connection::new())
    }

    /// Connect and verify that the peer is a C-WAVE.
    ///
    /// # Errors
    ///
    /// Returns [`CwaveError::IdentityMismatch`] if the peer's firmware string
    /// does not start with `"CWave "`. The connection is closed in that case,
    /// and on any other failure of the identity probe.
    pub fn connect<A: ToSocketAddrs>(&mut self, addr: A) -> CwaveResult<()> {
        self.link.connect(addr)?;
        self.verify_identity()
    }

    /// Connect to the given IP on the default port (10001).
    pub fn connect_ip(&mut self, ip: &str) -> CwaveResult<()> {
        self.connect(format!("{ip}:{DEFAULT_PORT}"))
    }

    /// Build a handle from `config` and connect it.
    pub fn connect_with(config: &ClientConfig) -> CwaveResult<Self> {
        let mut cw = Self::with_link(Connection::from_config(config)?);
        cw.connect(config.socket_addr())?;
        Ok(cw)
    }

    /// Set how long each exchange waits for its reply.
    pub fn set_response_timeout(&mut self, timeout: Duration) -> CwaveResult<()> {
        self.link.set_response_timeout(timeout)
    }
}

impl<L: Link> CWave<L> {
    /// Wrap an already constructed link.
    pub fn with_link(link: L) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn disconnect(&mut self) {
        self.link.disconnect();
    }

    /// Probe `info?` and disconnect unless it carries the C-WAVE signature.
    pub fn verify_identity(&mut self) -> CwaveResult<()> {
        match self.get_firmware_version() {
            Ok(signature) if signature.starts_with(SIGNATURE_PREFIX) => {
                info!("Connected to: {}", signature.trim());
                Ok(())
            }
            Ok(signature) => {
                self.link.disconnect();
                Err(CwaveError::IdentityMismatch { signature })
            }
            Err(e) => {
                self.link.disconnect();
                Err(e)
            }
        }
    }

    /// Send a raw command string and return the reply payload.
    pub fn exchange_raw(&mut self, command: &str) -> CwaveResult<String> {
        self.link.exchange(command)
    }

    fn send(&mut self, command: Command) -> CwaveResult<String> {
        self.link.exchange(&command.wire())
    }

    fn query<T: Decode>(&mut self, command: Command) -> CwaveResult<T> {
        let payload = self.send(command)?;
        decode(&payload)
    }

    // ==================== Identification ====================

    /// Firmware identification, e.g. `"CWave 2.1.0"`.
    pub fn get_firmware_version(&mut self) -> CwaveResult<String> {
        self.query(Command::FirmwareVersion)
    }

    pub fn get_fpga_version(&mut self) -> CwaveResult<i64> {
        self.query(Command::FpgaVersion)
    }

    pub fn get_serial_number(&mut self) -> CwaveResult<u64> {
        self.query(Command::SerialNumber)
    }

    // ==================== Wavelength ====================

    /// Dial a new wavelength in nm.
    ///
    /// With `request_shg` the value sent is `wavelength / 2`, the wavelength
    /// of the frequency-doubled output. The register resolution is 0.01 nm.
    pub fn dial(&mut self, wavelength: f64, request_shg: bool) -> CwaveResult<()> {
        if !wavelength.is_finite() || wavelength <= 0.0 {
            return Err(CwaveError::InvalidArgument(format!(
                "Wavelength must be positive: {wavelength}"
            )));
        }
        let target = if request_shg {
            wavelength / 2.0
        } else {
            wavelength
        };
        debug!("Dialing {target} nm (SHG requested: {request_shg})");
        self.send(Command::Dial(to_fixed(target, WAVELENGTH_SCALE)?))?;
        Ok(())
    }

    /// Whether both OPO and SHG report lock.
    pub fn get_dial_done(&mut self) -> CwaveResult<bool> {
        self.test_status_bits(&DIAL_DONE_BITS)
    }

    /// Poll [`get_dial_done`](Self::get_dial_done) until it reports true.
    ///
    /// # Errors
    ///
    /// Returns [`CwaveError::WaitTimeout`] if `timeout` expires first. Any
    /// exchange error aborts the wait immediately.
    pub fn wait_dial_done(&mut self, timeout: Duration, poll_interval: Duration) -> CwaveResult<()> {
        let start = Instant::now();
        loop {
            if self.get_dial_done()? {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(CwaveError::WaitTimeout(timeout));
            }
            std::thread::sleep(poll_interval);
        }
    }

    /// Move all elements by `delta` nm relative to the current wavelength.
    ///
    /// Non-finite or out-of-range deltas are rejected before anything is sent.
    pub fn elements_move(&mut self, delta: f64) -> CwaveResult<()> {
        self.send(Command::ElementsMove(to_fixed(delta, WAVELENGTH_SCALE)?))?;
        Ok(())
    }

    /// Move the thick etalon by `delta` nm.
    pub fn etalon_move(&mut self, delta: f64) -> CwaveResult<()> {
        self.send(Command::EtalonMove(to_fixed(delta, ETALON_SCALE)?))?;
        Ok(())
    }

    /// Stop all running optimizations.
    pub fn optimize_stop(&mut self) -> CwaveResult<()> {
        self.send(Command::OptimizeStop)?;
        Ok(())
    }

    /// Start the etalon optimization.
    pub fn optimize_etalon(&mut self) -> CwaveResult<()> {
        self.send(Command::OptimizeEtalon)?;
        Ok(())
    }

    pub fn set_stepper_period(&mut self, channel: StepperChannel, period: u32) -> CwaveResult<()> {
        self.send(Command::SetStepperPeriod(channel, period))?;
        Ok(())
    }

    // ==================== Piezo Control ====================

    /// Set the operating mode of a piezo loop.
    ///
    /// # Errors
    ///
    /// Returns [`CwaveError::InvalidArgument`] without sending anything if
    /// `Manual` is requested for a channel other than OPO/SHG, or `ExtRamp`
    /// for a channel other than OPO.
    pub fn set_piezo_mode(&mut self, channel: PiezoChannel, mode: PiezoMode) -> CwaveResult<()> {
        if !channel.supports(mode) {
            let allowed = match mode {
                PiezoMode::Manual => "OPO and SHG",
                _ => "OPO",
            };
            return Err(CwaveError::InvalidArgument(format!(
                "{mode} mode is only allowed on {allowed} channels, not {channel}"
            )));
        }
        self.send(Command::SetPiezoMode(channel, mode))?;
        Ok(())
    }

    pub fn get_piezo_mode(&mut self, channel: PiezoChannel) -> CwaveResult<PiezoMode> {
        self.query(Command::GetPiezoMode(channel))
    }

    /// Set the piezo output used in `Manual` mode (0-65535).
    ///
    /// Not available for the etalon; use [`set_etalon_offset`](Self::set_etalon_offset)
    /// while the etalon loop is in `Hold`.
    pub fn set_piezo_manual_output(&mut self, channel: PiezoChannel, value: u16) -> CwaveResult<()> {
        Self::reject_etalon_output(channel, "set_etalon_offset")?;
        self.send(Command::SetPiezoManualOutput(channel, value))?;
        Ok(())
    }

    pub fn get_piezo_manual_output(&mut self, channel: PiezoChannel) -> CwaveResult<u16> {
        Self::reject_etalon_output(channel, "get_etalon_offset")?;
        self.query(Command::GetPiezoManualOutput(channel))
    }

    fn reject_etalon_output(channel: PiezoChannel, alternative: &str) -> CwaveResult<()> {
        if channel == PiezoChannel::Etalon {
            return Err(CwaveError::InvalidArgument(format!(
                "Manual output not available for the etalon channel; use {alternative}() in Hold mode"
            )));
        }
        Ok(())
    }

    /// Set the etalon control offset.
    pub fn set_etalon_offset(&mut self, value: u16) -> CwaveResult<()> {
        self.send(Command::SetEtalonOffset(value))?;
        Ok(())
    }

    pub fn get_etalon_offset(&mut self) -> CwaveResult<u16> {
        self.query(Command::GetEtalonOffset)
    }

    /// Configure the internal signal generator for OPO `ExtRamp` mode.
    ///
    /// Percent bounds are checked by the device, not here.
    pub fn set_opo_extramp_settings(
        &mut self,
        period_ms: u32,
        mode: ExtRampMode,
        lower_percent: u8,
        upper_percent: u8,
    ) -> CwaveResult<()> {
        self.send(Command::SetOpoExtRamp {
            period_ms,
            mode,
            lower_percent,
            upper_percent,
        })?;
        Ok(())
    }

    // ==================== Mechanics ====================

    /// Set the thick etalon (galvo) position.
    pub fn set_galvo_position(&mut self, value: i64) -> CwaveResult<()> {
        self.send(Command::SetGalvoPosition(value))?;
        Ok(())
    }

    pub fn get_galvo_position(&mut self) -> CwaveResult<i64> {
        self.query(Command::GetGalvoPosition)
    }

    pub fn set_shutter(&mut self, shutter: ShutterChannel, open: bool) -> CwaveResult<()> {
        self.send(Command::SetShutter(shutter, open))?;
        Ok(())
    }

    /// Whether a shutter is open.
    pub fn get_shutter(&mut self, shutter: ShutterChannel) -> CwaveResult<bool> {
        self.query(Command::GetShutter(shutter))
    }

    /// Flip the output mirror to position 0 (`false`) or 1 (`true`).
    pub fn set_mirror(&mut self, position: bool) -> CwaveResult<()> {
        self.send(Command::SetMirror(position))?;
        Ok(())
    }

    pub fn get_mirror(&mut self) -> CwaveResult<bool> {
        self.query(Command::GetMirror)
    }

    // ==================== Pump Laser ====================

    /// Enable or disable the internal pump laser.
    pub fn set_laser(&mut self, enable: bool) -> CwaveResult<()> {
        self.send(Command::SetLaser(enable))?;
        Ok(())
    }

    pub fn get_laser(&mut self) -> CwaveResult<bool> {
        self.query(Command::GetLaser)
    }

    /// Whether the device is pumped by an external laser.
    ///
    /// The device reports `0` when no internal pump laser is installed.
    pub fn get_external_pump(&mut self) -> CwaveResult<bool> {
        let present: i64 = self.query(Command::ExternalPumpAbsent)?;
        Ok(present == 0)
    }

    // ==================== Temperatures ====================

    /// Set a temperature setpoint in °C (resolution 0.001 °C).
    pub fn set_temperature_setpoint(
        &mut self,
        channel: TemperatureChannel,
        setpoint: f64,
    ) -> CwaveResult<()> {
        self.send(Command::SetTemperatureSetpoint(
            channel,
            to_fixed(setpoint, TEMPERATURE_SCALE)?,
        ))?;
        Ok(())
    }

    /// Current temperature setpoint in °C.
    pub fn get_temperature_setpoint(&mut self, channel: TemperatureChannel) -> CwaveResult<f64> {
        let payload = self.send(Command::GetTemperatureSetpoint(channel))?;
        decode_scaled(&payload, TEMPERATURE_SCALE)
    }

    /// Look up the crystal temperature (°C) the device's mapping table
    /// associates with `wavelength` (nm).
    ///
    /// The reply echoes the wavelength before the temperature
    /// (`<lambda>:<millidegrees>`).
    pub fn get_mapping_temperature(
        &mut self,
        channel: MappingChannel,
        wavelength: f64,
    ) -> CwaveResult<f64> {
        let payload = self.send(Command::MappingTemperature(
            channel,
            to_fixed(wavelength, WAVELENGTH_SCALE)?,
        ))?;
        let temperature = payload.split(':').nth(1).ok_or_else(|| {
            CwaveError::ProtocolError(format!("Mapping reply has no temperature: {payload:?}"))
        })?;
        decode_scaled(temperature, TEMPERATURE_SCALE)
    }

    // ==================== Status ====================

    /// Latest device status summary.
    pub fn get_log(&mut self) -> CwaveResult<Log> {
        self.query(Command::GetLog)
    }

    /// Status field from a fresh [`get_log`](Self::get_log).
    pub fn get_status_bits(&mut self) -> CwaveResult<StatusBits> {
        Ok(self.get_log()?.status_bits)
    }

    /// Fetch the status once and check that every listed condition is OK.
    ///
    /// Returns `false` at the first faulted bit. An empty list is `true`.
    pub fn test_status_bits(&mut self, bits: &[StatusBit]) -> CwaveResult<bool> {
        let status = self.get_status_bits()?;
        Ok(status.all_ok(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::collections::VecDeque;
    use strum::IntoEnumIterator;

    /// Link that records commands and answers with canned reply lines.
    #[derive(Default)]
    struct ScriptedLink {
        connected: bool,
        sent: Vec<String>,
        replies: VecDeque<String>,
        /// Reply used once `replies` runs dry
        fallback: Option<String>,
    }

    impl ScriptedLink {
        fn new(replies: &[&str]) -> Self {
            Self {
                connected: true,
                replies: replies.iter().map(|r| r.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl Link for ScriptedLink {
        fn exchange(&mut self, command: &str) -> CwaveResult<String> {
            if !self.connected {
                return Err(CwaveError::NotConnected);
            }
            self.sent.push(command.to_string());
            let reply = self
                .replies
                .pop_front()
                .or_else(|| self.fallback.clone())
                .unwrap_or_default();
            Connection::parse_response(command, &reply)
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }
    }

    fn cwave(replies: &[&str]) -> CWave<ScriptedLink> {
        CWave::with_link(ScriptedLink::new(replies))
    }

    fn log_reply(status: u32) -> String {
        format!("get_log:25000:24000:24100:23000:22000:21000:100:200:50:10:{status}")
    }

    #[test]
    fn test_dial_with_shg_halves_wavelength() {
        let mut cw = cwave(&["opo_lambda:55000"]);
        cw.dial(1100.0, true).unwrap();
        assert_eq!(cw.link().sent, vec!["opo_lambda:55000"]);
    }

    #[test]
    fn test_dial_without_shg() {
        let mut cw = cwave(&["opo_lambda:110000"]);
        cw.dial(1100.0, false).unwrap();
        assert_eq!(cw.link().sent, vec!["opo_lambda:110000"]);
    }

    #[test]
    fn test_dial_rejects_nonsense_wavelength() {
        let mut cw = cwave(&[]);
        assert!(matches!(
            cw.dial(f64::NAN, false),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(matches!(
            cw.dial(-5.0, true),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(cw.link().sent.is_empty());
    }

    #[test]
    fn test_piezo_mode_table() {
        for channel in PiezoChannel::iter() {
            for mode in PiezoMode::iter() {
                let mut cw = cwave(&["reg:0"]);
                let result = cw.set_piezo_mode(channel, mode);
                let allowed = match mode {
                    PiezoMode::Manual => {
                        matches!(channel, PiezoChannel::Opo | PiezoChannel::Shg)
                    }
                    PiezoMode::ExtRamp => channel == PiezoChannel::Opo,
                    _ => true,
                };
                if allowed {
                    assert!(result.is_ok(), "{channel:?}/{mode:?} should be accepted");
                    assert_eq!(
                        cw.link().sent,
                        vec![format!("reg{}_on:{}", channel.as_str(), mode.value())]
                    );
                } else {
                    assert!(
                        matches!(result, Err(CwaveError::InvalidArgument(_))),
                        "{channel:?}/{mode:?} should be rejected"
                    );
                    assert!(cw.link().sent.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_get_piezo_mode() {
        let mut cw = cwave(&["regshg_on:2"]);
        assert_eq!(
            cw.get_piezo_mode(PiezoChannel::Shg).unwrap(),
            PiezoMode::Control
        );
        assert_eq!(cw.link().sent, vec!["regshg_on?"]);
    }

    #[test]
    fn test_etalon_manual_output_rejected() {
        let mut cw = cwave(&[]);
        assert!(matches!(
            cw.set_piezo_manual_output(PiezoChannel::Etalon, 100),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(matches!(
            cw.get_piezo_manual_output(PiezoChannel::Etalon),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(cw.link().sent.is_empty());
    }

    #[test]
    fn test_manual_output_and_etalon_offset() {
        let mut cw = cwave(&[
            "regopo_out:65535",
            "regopo_out:65535",
            "regeta_off:9000",
            "regeta_off:9000",
        ]);
        cw.set_piezo_manual_output(PiezoChannel::Opo, 65535).unwrap();
        assert_eq!(cw.get_piezo_manual_output(PiezoChannel::Opo).unwrap(), 65535);
        cw.set_etalon_offset(9000).unwrap();
        assert_eq!(cw.get_etalon_offset().unwrap(), 9000);
        assert_eq!(
            cw.link().sent,
            vec!["regopo_out:65535", "regopo_out?", "regeta_off:9000", "regeta_off?"]
        );
    }

    #[test]
    fn test_get_log() {
        let mut cw = cwave(&[&log_reply(5)]);
        let log = cw.get_log().unwrap();
        assert_abs_diff_eq!(log.temp_opo, 25.0);
        assert_abs_diff_eq!(log.temp_shg2, 24.1);
        assert_abs_diff_eq!(log.temp_fpga, 21.0);
        assert_eq!(log.pd_signal, 200);
        assert_eq!(log.status_bits.raw(), 5);
        assert_eq!(cw.link().sent, vec!["get_log?"]);
    }

    #[test]
    fn test_get_log_short_payload() {
        let mut cw = cwave(&["get_log:1:2:3"]);
        assert!(matches!(cw.get_log(), Err(CwaveError::ProtocolError(_))));
    }

    #[test]
    fn test_status_bits_empty_list_is_true() {
        let mut cw = cwave(&[&log_reply(u32::MAX)]);
        assert!(cw.test_status_bits(&[]).unwrap());
        assert_eq!(cw.link().sent.len(), 1);
    }

    #[test]
    fn test_dial_done_polarity() {
        let mut cw = cwave(&[&log_reply(0)]);
        assert!(cw.get_dial_done().unwrap());

        let mut cw = cwave(&[&log_reply(StatusBit::ShgLock.mask())]);
        assert!(!cw.get_dial_done().unwrap());

        // Faults elsewhere do not matter
        let mask = StatusBit::OpoTemp.mask() | StatusBit::LaserEmission.mask();
        let mut cw = cwave(&[&log_reply(mask)]);
        assert!(cw.get_dial_done().unwrap());
    }

    #[test]
    fn test_wait_dial_done() {
        let locked = log_reply(0);
        let unlocked = log_reply(StatusBit::OpoLock.mask());
        let mut cw = cwave(&[&unlocked, &unlocked, &locked]);
        cw.wait_dial_done(Duration::from_secs(5), Duration::from_millis(1))
            .unwrap();
        assert_eq!(cw.link().sent.len(), 3);
    }

    #[test]
    fn test_wait_dial_done_times_out() {
        let mut link = ScriptedLink::new(&[]);
        link.fallback = Some(log_reply(StatusBit::OpoLock.mask()));
        let mut cw = CWave::with_link(link);
        let result = cw.wait_dial_done(Duration::from_millis(30), Duration::from_millis(5));
        assert!(matches!(result, Err(CwaveError::WaitTimeout(_))));
        assert!(cw.link().sent.len() >= 2);
    }

    #[test]
    fn test_temperature_setpoint_round_trip() {
        let mut cw = cwave(&["topo_set:45123", "topo_set:45123"]);
        cw.set_temperature_setpoint(TemperatureChannel::Opo, 45.123)
            .unwrap();
        let back = cw
            .get_temperature_setpoint(TemperatureChannel::Opo)
            .unwrap();
        assert_abs_diff_eq!(back, 45.123, epsilon = 0.0005);
        assert_eq!(cw.link().sent, vec!["topo_set:45123", "topo_set?"]);
    }

    #[test]
    fn test_mapping_temperature() {
        let mut cw = cwave(&["mapping_opo?114969:45123"]);
        let temp = cw
            .get_mapping_temperature(MappingChannel::Opo, 1149.69)
            .unwrap();
        assert_abs_diff_eq!(temp, 45.123, epsilon = 1e-9);
        assert_eq!(cw.link().sent, vec!["mapping_opo?114969"]);
    }

    #[test]
    fn test_mapping_temperature_malformed() {
        let mut cw = cwave(&["mapping_shg:45123"]);
        assert!(matches!(
            cw.get_mapping_temperature(MappingChannel::Shg, 575.0),
            Err(CwaveError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_extramp_settings_order() {
        let mut cw = cwave(&["regopo_extramp:100:1:20:70"]);
        cw.set_opo_extramp_settings(100, ExtRampMode::Triangle, 20, 70)
            .unwrap();
        assert_eq!(cw.link().sent, vec!["regopo_extramp:100:1:20:70"]);
    }

    #[test]
    fn test_shutters_mirror_laser() {
        let mut cw = cwave(&[
            "shtter_las_out:1",
            "shtter_las_out:0",
            "mirror:1",
            "laser_en:1",
            "laser_exist:0",
        ]);
        cw.set_shutter(ShutterChannel::LaserOut, true).unwrap();
        assert!(!cw.get_shutter(ShutterChannel::LaserOut).unwrap());
        assert!(cw.get_mirror().unwrap());
        assert!(cw.get_laser().unwrap());
        assert!(cw.get_external_pump().unwrap());
        assert_eq!(
            cw.link().sent,
            vec![
                "shtter_las_out:1",
                "shtter_las_out?",
                "mirror?",
                "laser_en?",
                "laser_exist?"
            ]
        );
    }

    #[test]
    fn test_moves_and_optimizations() {
        let mut cw = cwave(&[
            "opo_rlambda:-25",
            "thicketa_rel_hr:150",
            "opt_stop",
            "regeta_catch",
            "opo_pos_i:40",
        ]);
        cw.elements_move(-0.25).unwrap();
        cw.etalon_move(0.15).unwrap();
        cw.optimize_stop().unwrap();
        cw.optimize_etalon().unwrap();
        cw.set_stepper_period(StepperChannel::Opo, 40).unwrap();
        assert_eq!(
            cw.link().sent,
            vec![
                "opo_rlambda:-25",
                "thicketa_rel_hr:150",
                "opt_stop",
                "regeta_catch",
                "opo_pos_i:40"
            ]
        );
    }

    #[test]
    fn test_non_finite_arguments_rejected_before_sending() {
        let mut cw = cwave(&[]);
        assert!(matches!(
            cw.elements_move(f64::NAN),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(matches!(
            cw.etalon_move(f64::INFINITY),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(matches!(
            cw.etalon_move(1e300),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(matches!(
            cw.get_mapping_temperature(MappingChannel::Opo, f64::NAN),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(matches!(
            cw.get_mapping_temperature(MappingChannel::Shg, f64::NEG_INFINITY),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(matches!(
            cw.set_temperature_setpoint(TemperatureChannel::Ref, f64::NAN),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(matches!(
            cw.dial(f64::INFINITY, false),
            Err(CwaveError::InvalidArgument(_))
        ));
        assert!(cw.link().sent.is_empty());
    }

    #[test]
    fn test_command_failure_carries_command() {
        let mut cw = cwave(&["?BADCMD"]);
        match cw.set_galvo_position(5) {
            Err(CwaveError::CommandFailed { command }) => assert_eq!(command, "galvo:5"),
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
        assert!(cw.is_connected());
    }

    #[test]
    fn test_identity_accepted() {
        let mut cw = cwave(&["info:CWave 2.1.0"]);
        cw.verify_identity().unwrap();
        assert!(cw.is_connected());
    }

    #[test]
    fn test_identity_mismatch_disconnects() {
        let mut cw = cwave(&["info:SomethingElse 1.0"]);
        match cw.verify_identity() {
            Err(CwaveError::IdentityMismatch { signature }) => {
                assert_eq!(signature, "SomethingElse 1.0")
            }
            other => panic!("Expected IdentityMismatch, got {other:?}"),
        }
        assert!(!cw.is_connected());
        assert!(matches!(cw.get_log(), Err(CwaveError::NotConnected)));
    }

    #[test]
    fn test_identity_probe_failure_disconnects() {
        let mut cw = cwave(&["?info"]);
        assert!(matches!(
            cw.verify_identity(),
            Err(CwaveError::CommandFailed { .. })
        ));
        assert!(!cw.is_connected());
    }

    #[test]
    fn test_identification_queries() {
        let mut cw = cwave(&["info_fpga:17", "uniqueid:4294967296123"]);
        assert_eq!(cw.get_fpga_version().unwrap(), 17);
        assert_eq!(cw.get_serial_number().unwrap(), 4294967296123);
    }
}
