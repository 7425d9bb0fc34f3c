//! Command construction and payload decoding.
//!
//! # Command Shapes
//!
//! The C-WAVE protocol knows three shapes of command line:
//!
//! ```text
//! opo_lambda?                 query
//! mapping_opo?114969          query carrying an argument
//! regopo_extramp:100:1:20:70  set, values colon-joined
//! opt_stop                    bare action
//! ```
//!
//! [`Frame`] renders these shapes. [`Command`] is the closed set of requests
//! the client actually issues; each variant knows its register name and
//! argument shape, so call sites never format command strings by hand.
//!
//! # Fixed Point
//!
//! Physical values travel as integers: wavelengths in 0.01 nm, temperatures
//! in 0.001 °C. [`to_fixed`] rounds to the nearest register step.

use crate::error::{CwaveError, CwaveResult};
use crate::types::{
    ExtRampMode, Log, MappingChannel, PiezoChannel, PiezoMode, ShutterChannel, StatusBits,
    StepperChannel, TemperatureChannel,
};

/// Wavelength registers count in units of 0.01 nm.
pub const WAVELENGTH_SCALE: f64 = 100.0;

/// Temperature registers count in units of 0.001 °C.
pub const TEMPERATURE_SCALE: f64 = 1000.0;

/// Thick etalon relative moves count in units of 0.001 nm.
pub const ETALON_SCALE: f64 = 1000.0;

/// Convert a physical value to its integer register representation.
///
/// # Errors
///
/// Returns [`CwaveError::InvalidArgument`] if `value` is not finite or the
/// scaled value does not fit an `i64` register.
pub fn to_fixed(value: f64, scale: f64) -> CwaveResult<i64> {
    let scaled = (value * scale).round();
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
    if !scaled.is_finite() || scaled < i64::MIN as f64 || scaled >= i64::MAX as f64 {
        return Err(CwaveError::InvalidArgument(format!(
            "{value} cannot be represented at scale {scale}"
        )));
    }
    Ok(scaled as i64)
}

/// Convert an integer register value back to physical units.
pub fn from_fixed(raw: i64, scale: f64) -> f64 {
    raw as f64 / scale
}

/// One rendered command line, without terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `<name>?` or `<name>?<argument>`
    Query {
        name: String,
        argument: Option<String>,
    },
    /// `<name>:<v1>:<v2>...`
    Set { name: String, values: Vec<String> },
    /// `<name>` with no suffix
    Action { name: String },
}

impl Frame {
    pub fn query(name: impl Into<String>) -> Self {
        Frame::Query {
            name: name.into(),
            argument: None,
        }
    }

    pub fn action(name: impl Into<String>) -> Self {
        Frame::Action { name: name.into() }
    }

    /// Build a value-setting frame.
    ///
    /// If `name` already ends in `?` the values become the argument of a query
    /// (`mapping_opo?114969`) instead of a colon-suffixed set.
    pub fn set_value<V: ToString>(name: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        match name.strip_suffix('?') {
            Some(query) => Frame::Query {
                name: query.to_string(),
                argument: Some(values.join(":")),
            },
            None => Frame::Set {
                name: name.to_string(),
                values,
            },
        }
    }

    /// The command string as it goes on the wire (terminator excluded).
    pub fn render(&self) -> String {
        match self {
            Frame::Query {
                name,
                argument: None,
            } => format!("{name}?"),
            Frame::Query {
                name,
                argument: Some(arg),
            } => format!("{name}?{arg}"),
            Frame::Set { name, values } => format!("{name}:{}", values.join(":")),
            Frame::Action { name } => name.clone(),
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Every request the client sends, with its argument shape fixed by type.
///
/// Integer arguments are already in register units; the facade performs the
/// physical-unit conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FirmwareVersion,
    FpgaVersion,
    SerialNumber,
    GetLog,
    ExternalPumpAbsent,
    OptimizeStop,
    OptimizeEtalon,
    /// OPO wavelength in 0.01 nm
    Dial(i64),
    /// Relative wavelength move of all elements in 0.01 nm
    ElementsMove(i64),
    /// Relative thick etalon move in 0.001 nm
    EtalonMove(i64),
    SetStepperPeriod(StepperChannel, u32),
    SetPiezoMode(PiezoChannel, PiezoMode),
    GetPiezoMode(PiezoChannel),
    SetPiezoManualOutput(PiezoChannel, u16),
    GetPiezoManualOutput(PiezoChannel),
    SetEtalonOffset(u16),
    GetEtalonOffset,
    SetGalvoPosition(i64),
    GetGalvoPosition,
    SetLaser(bool),
    GetLaser,
    SetShutter(ShutterChannel, bool),
    GetShutter(ShutterChannel),
    SetMirror(bool),
    GetMirror,
    /// Setpoint in 0.001 °C
    SetTemperatureSetpoint(TemperatureChannel, i64),
    GetTemperatureSetpoint(TemperatureChannel),
    /// Wavelength in 0.01 nm
    MappingTemperature(MappingChannel, i64),
    SetOpoExtRamp {
        period_ms: u32,
        mode: ExtRampMode,
        lower_percent: u8,
        upper_percent: u8,
    },
}

impl Command {
    /// Map this request onto its wire shape.
    pub fn frame(&self) -> Frame {
        match self {
            Command::FirmwareVersion => Frame::query("info"),
            Command::FpgaVersion => Frame::query("info_fpga"),
            Command::SerialNumber => Frame::query("uniqueid"),
            Command::GetLog => Frame::query("get_log"),
            Command::ExternalPumpAbsent => Frame::query("laser_exist"),
            Command::OptimizeStop => Frame::action("opt_stop"),
            Command::OptimizeEtalon => Frame::action("regeta_catch"),
            Command::Dial(lambda) => Frame::set_value("opo_lambda", [lambda]),
            Command::ElementsMove(delta) => Frame::set_value("opo_rlambda", [delta]),
            Command::EtalonMove(delta) => Frame::set_value("thicketa_rel_hr", [delta]),
            Command::SetStepperPeriod(ch, period) => {
                Frame::set_value(&format!("{ch}_pos_i"), [period])
            }
            Command::SetPiezoMode(ch, mode) => {
                Frame::set_value(&format!("reg{ch}_on"), [mode.value()])
            }
            Command::GetPiezoMode(ch) => Frame::query(format!("reg{ch}_on")),
            Command::SetPiezoManualOutput(ch, value) => {
                Frame::set_value(&format!("reg{ch}_out"), [value])
            }
            Command::GetPiezoManualOutput(ch) => Frame::query(format!("reg{ch}_out")),
            Command::SetEtalonOffset(value) => Frame::set_value("regeta_off", [value]),
            Command::GetEtalonOffset => Frame::query("regeta_off"),
            Command::SetGalvoPosition(value) => Frame::set_value("galvo", [value]),
            Command::GetGalvoPosition => Frame::query("galvo"),
            Command::SetLaser(on) => Frame::set_value("laser_en", [u8::from(*on)]),
            Command::GetLaser => Frame::query("laser_en"),
            Command::SetShutter(ch, open) => {
                Frame::set_value(&format!("shtter_{ch}"), [u8::from(*open)])
            }
            Command::GetShutter(ch) => Frame::query(format!("shtter_{ch}")),
            Command::SetMirror(position) => Frame::set_value("mirror", [u8::from(*position)]),
            Command::GetMirror => Frame::query("mirror"),
            Command::SetTemperatureSetpoint(ch, millideg) => {
                Frame::set_value(&format!("t{ch}_set"), [millideg])
            }
            Command::GetTemperatureSetpoint(ch) => Frame::query(format!("t{ch}_set")),
            Command::MappingTemperature(ch, lambda) => {
                Frame::set_value(&format!("mapping_{ch}?"), [lambda])
            }
            Command::SetOpoExtRamp {
                period_ms,
                mode,
                lower_percent,
                upper_percent,
            } => Frame::set_value(
                "regopo_extramp",
                [
                    period_ms.to_string(),
                    mode.value().to_string(),
                    lower_percent.to_string(),
                    upper_percent.to_string(),
                ],
            ),
        }
    }

    /// Command string ready for [`Link::exchange`](crate::transport::Link::exchange).
    pub fn wire(&self) -> String {
        self.frame().render()
    }
}

/// Types that can be decoded from a reply payload.
pub trait Decode: Sized {
    fn decode(payload: &str) -> CwaveResult<Self>;
}

fn parse_int(payload: &str, target: &'static str) -> CwaveResult<i64> {
    payload
        .trim()
        .parse()
        .map_err(|_| CwaveError::decode(payload, target))
}

impl Decode for i64 {
    fn decode(payload: &str) -> CwaveResult<Self> {
        parse_int(payload, "i64")
    }
}

/// Implements [`Decode`] through `FromStr` on the trimmed payload.
macro_rules! decode_via_parse {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Decode for $ty {
                fn decode(payload: &str) -> CwaveResult<Self> {
                    payload
                        .trim()
                        .parse()
                        .map_err(|_| CwaveError::decode(payload, stringify!($ty)))
                }
            }
        )+
    };
}

decode_via_parse!(u64, u32, u16, f64);

/// Nonzero integer is `true`.
impl Decode for bool {
    fn decode(payload: &str) -> CwaveResult<Self> {
        Ok(parse_int(payload, "bool")? != 0)
    }
}

impl Decode for String {
    fn decode(payload: &str) -> CwaveResult<Self> {
        Ok(payload.to_string())
    }
}

impl Decode for PiezoMode {
    fn decode(payload: &str) -> CwaveResult<Self> {
        let raw = parse_int(payload, "PiezoMode")?;
        PiezoMode::try_from(raw).map_err(|_| CwaveError::decode(payload, "PiezoMode"))
    }
}

impl Decode for ExtRampMode {
    fn decode(payload: &str) -> CwaveResult<Self> {
        let raw = parse_int(payload, "ExtRampMode")?;
        ExtRampMode::try_from(raw).map_err(|_| CwaveError::decode(payload, "ExtRampMode"))
    }
}

impl Decode for Log {
    fn decode(payload: &str) -> CwaveResult<Self> {
        let fields: Vec<&str> = payload.split(':').collect();
        if fields.len() < Log::FIELD_COUNT {
            return Err(CwaveError::ProtocolError(format!(
                "Log has {} fields, expected {}: {payload:?}",
                fields.len(),
                Log::FIELD_COUNT
            )));
        }

        let mut raw = [0i64; Log::FIELD_COUNT];
        for (slot, field) in raw.iter_mut().zip(&fields) {
            *slot = parse_int(field, "Log field")?;
        }
        let temp = |value: i64| from_fixed(value, TEMPERATURE_SCALE);
        let status = u32::try_from(raw[10]).map_err(|_| CwaveError::decode(fields[10], "u32"))?;

        Ok(Log {
            temp_opo: temp(raw[0]),
            temp_shg1: temp(raw[1]),
            temp_shg2: temp(raw[2]),
            temp_ref: temp(raw[3]),
            temp_base: temp(raw[4]),
            temp_fpga: temp(raw[5]),
            pd_pump: raw[6],
            pd_signal: raw[7],
            pd_shg: raw[8],
            pd_reserve: raw[9],
            status_bits: StatusBits(status),
        })
    }
}

/// Decode a payload into `T`.
pub fn decode<T: Decode>(payload: &str) -> CwaveResult<T> {
    T::decode(payload)
}

/// Decode a fixed-point integer payload into physical units.
pub fn decode_scaled(payload: &str, scale: f64) -> CwaveResult<f64> {
    Ok(from_fixed(parse_int(payload, "fixed-point")?, scale))
}

/// Render a log record the way `get_log?` transmits it.
pub fn encode_log(log: &Log) -> CwaveResult<String> {
    let temp = |value: f64| to_fixed(value, TEMPERATURE_SCALE);
    Ok(format!(
        "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
        temp(log.temp_opo)?,
        temp(log.temp_shg1)?,
        temp(log.temp_shg2)?,
        temp(log.temp_ref)?,
        temp(log.temp_base)?,
        temp(log.temp_fpga)?,
        log.pd_pump,
        log.pd_signal,
        log.pd_shg,
        log.pd_reserve,
        log.status_bits.raw()
    ))
}
