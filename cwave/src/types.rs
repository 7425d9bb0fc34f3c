//! Channels, modes, status bits and the status log record.
//!
//! Channel enumerations are pure name mappings: their only job is to supply
//! the token that goes into a command string (`as_str()`). Mode enumerations
//! are transmitted as their integer discriminant.

use clap::ValueEnum;

/// Implements `as_str`, `Display` and `FromStr` for a wire-token enum.
macro_rules! wire_tokens {
    ($ty:ident { $($variant:ident => $token:literal),+ $(,)? }) => {
        impl $ty {
            /// Token used for this channel in command strings.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $token,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($token => Ok($ty::$variant),)+
                    _ => Err(format!(
                        "Invalid {}: {s}",
                        stringify!($ty)
                    )),
                }
            }
        }
    };
}

/// Shutters that can be opened or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, strum::EnumIter)]
pub enum ShutterChannel {
    /// Internal pump laser
    Laser,
    /// Pump laser output port
    LaserOut,
    /// OPO output port
    OpoOut,
    /// SHG stage
    Shg,
    /// SHG output port
    ShgOut,
}

wire_tokens!(ShutterChannel {
    Laser => "las",
    LaserOut => "las_out",
    OpoOut => "opo_out",
    Shg => "shg",
    ShgOut => "shg_out",
});

/// Stepper motor drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, strum::EnumIter)]
pub enum StepperChannel {
    Opo,
    Shg,
}

wire_tokens!(StepperChannel {
    Opo => "opo",
    Shg => "shg",
});

/// Wavelength to temperature mapping tables stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, strum::EnumIter)]
pub enum MappingChannel {
    Opo,
    Shg,
}

wire_tokens!(MappingChannel {
    Opo => "opo",
    Shg => "shg",
});

/// Temperature-controlled stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, strum::EnumIter)]
pub enum TemperatureChannel {
    Opo,
    Shg,
    /// Reference cell
    Ref,
}

wire_tokens!(TemperatureChannel {
    Opo => "opo",
    Shg => "shg",
    Ref => "ref",
});

/// Piezo-driven control loop elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, strum::EnumIter)]
pub enum PiezoChannel {
    Opo,
    Shg,
    /// Thin etalon. Has its own offset register instead of a manual output.
    Etalon,
    /// Reference cavity
    Ref,
}

wire_tokens!(PiezoChannel {
    Opo => "opo",
    Shg => "shg",
    Etalon => "eta",
    Ref => "ref",
});

impl PiezoChannel {
    /// Whether `mode` may be selected on this channel.
    ///
    /// `Manual` is limited to OPO and SHG, `ExtRamp` to OPO. Every other mode
    /// is accepted on every channel.
    pub fn supports(self, mode: PiezoMode) -> bool {
        match mode {
            PiezoMode::Manual => matches!(self, PiezoChannel::Opo | PiezoChannel::Shg),
            PiezoMode::ExtRamp => self == PiezoChannel::Opo,
            PiezoMode::Hold | PiezoMode::Scan | PiezoMode::Control => true,
        }
    }
}

/// Piezo operating mode, sent as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, strum::EnumIter, strum::Display)]
#[repr(u8)]
pub enum PiezoMode {
    /// Output held (the "off" mode)
    Hold = 0,
    Scan = 1,
    /// Closed-loop servo
    Control = 2,
    /// Driven by the internal signal generator
    ExtRamp = 3,
    /// Output set through the manual output register
    Manual = 4,
}

impl PiezoMode {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl TryFrom<i64> for PiezoMode {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PiezoMode::Hold),
            1 => Ok(PiezoMode::Scan),
            2 => Ok(PiezoMode::Control),
            3 => Ok(PiezoMode::ExtRamp),
            4 => Ok(PiezoMode::Manual),
            other => Err(other),
        }
    }
}

/// Waveform of the internal signal generator used in `ExtRamp` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, strum::EnumIter, strum::Display)]
#[repr(u8)]
pub enum ExtRampMode {
    Sawtooth = 0,
    Triangle = 1,
}

impl ExtRampMode {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl TryFrom<i64> for ExtRampMode {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ExtRampMode::Sawtooth),
            1 => Ok(ExtRampMode::Triangle),
            other => Err(other),
        }
    }
}

/// Named conditions in the device status field and their bit positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, strum::EnumIter, strum::Display)]
#[repr(u8)]
pub enum StatusBit {
    OpoStepper = 0,
    OpoTemp = 1,
    ShgStepper = 2,
    ShgTemp = 3,
    EtalonCoarse = 4,
    OpoLock = 5,
    ShgLock = 6,
    EtalonLock = 7,
    LaserEmission = 8,
    RefTemp = 9,
    OpoStable = 10,
}

impl StatusBit {
    /// Bit position in the status field.
    pub fn position(self) -> u8 {
        self as u8
    }

    pub fn mask(self) -> u32 {
        1 << self.position()
    }
}

/// State of one status condition.
///
/// On the wire a cleared bit means [`Condition::Ok`] and a set bit means
/// [`Condition::Fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Ok,
    Fault,
}

impl Condition {
    pub fn is_ok(self) -> bool {
        self == Condition::Ok
    }
}

/// Raw 32-bit status field as reported in the device log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusBits(pub u32);

impl StatusBits {
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Decode one condition, honoring the inverted polarity.
    pub fn condition(self, bit: StatusBit) -> Condition {
        if self.0 & bit.mask() == 0 {
            Condition::Ok
        } else {
            Condition::Fault
        }
    }

    /// True if every listed condition is OK. Stops at the first fault.
    ///
    /// An empty list is trivially satisfied.
    pub fn all_ok(self, bits: &[StatusBit]) -> bool {
        bits.iter().all(|&bit| self.condition(bit).is_ok())
    }

    /// All known conditions currently reporting a fault.
    pub fn faults(self) -> Vec<StatusBit> {
        use strum::IntoEnumIterator;

        StatusBit::iter()
            .filter(|&bit| self.condition(bit) == Condition::Fault)
            .collect()
    }
}

impl From<u32> for StatusBits {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Snapshot of the device status as returned by `get_log?`.
///
/// Temperatures are in °C. Photodiode readings are raw ADC counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Log {
    pub temp_opo: f64,
    pub temp_shg1: f64,
    pub temp_shg2: f64,
    /// Reference cell temperature
    pub temp_ref: f64,
    pub temp_base: f64,
    pub temp_fpga: f64,
    pub pd_pump: i64,
    pub pd_signal: i64,
    pub pd_shg: i64,
    pub pd_reserve: i64,
    pub status_bits: StatusBits,
}

impl Log {
    /// Number of colon-separated fields in the wire representation.
    pub const FIELD_COUNT: usize = 11;
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_channel_tokens() {
        assert_eq!(ShutterChannel::LaserOut.as_str(), "las_out");
        assert_eq!(ShutterChannel::ShgOut.to_string(), "shg_out");
        assert_eq!(PiezoChannel::Etalon.as_str(), "eta");
        assert_eq!(TemperatureChannel::Ref.as_str(), "ref");
    }

    #[test]
    fn test_channel_from_token() {
        for channel in ShutterChannel::iter() {
            assert_eq!(channel.as_str().parse::<ShutterChannel>(), Ok(channel));
        }
        for channel in PiezoChannel::iter() {
            assert_eq!(channel.as_str().parse::<PiezoChannel>(), Ok(channel));
        }
        assert!("etalon".parse::<PiezoChannel>().is_err());
    }

    #[test]
    fn test_mode_values_round_trip() {
        for mode in PiezoMode::iter() {
            assert_eq!(PiezoMode::try_from(mode.value() as i64), Ok(mode));
        }
        assert_eq!(ExtRampMode::try_from(1), Ok(ExtRampMode::Triangle));
        assert_eq!(PiezoMode::try_from(5), Err(5));
    }

    #[test]
    fn test_piezo_mode_restrictions() {
        assert!(PiezoChannel::Opo.supports(PiezoMode::ExtRamp));
        assert!(PiezoChannel::Opo.supports(PiezoMode::Manual));
        assert!(PiezoChannel::Shg.supports(PiezoMode::Manual));
        assert!(!PiezoChannel::Shg.supports(PiezoMode::ExtRamp));
        assert!(!PiezoChannel::Etalon.supports(PiezoMode::Manual));
        assert!(!PiezoChannel::Ref.supports(PiezoMode::ExtRamp));
        for channel in PiezoChannel::iter() {
            assert!(channel.supports(PiezoMode::Hold));
            assert!(channel.supports(PiezoMode::Scan));
            assert!(channel.supports(PiezoMode::Control));
        }
    }

    #[test]
    fn test_status_polarity() {
        let status = StatusBits(StatusBit::ShgLock.mask());
        assert_eq!(status.condition(StatusBit::OpoLock), Condition::Ok);
        assert_eq!(status.condition(StatusBit::ShgLock), Condition::Fault);
        assert!(status.all_ok(&[StatusBit::OpoLock, StatusBit::OpoTemp]));
        assert!(!status.all_ok(&[StatusBit::OpoLock, StatusBit::ShgLock]));
        assert_eq!(status.faults(), vec![StatusBit::ShgLock]);
    }

    #[test]
    fn test_empty_status_list_is_ok() {
        assert!(StatusBits(0).all_ok(&[]));
        assert!(StatusBits(u32::MAX).all_ok(&[]));
    }

    #[test]
    fn test_all_bits_set_faults_everything() {
        let status = StatusBits(0x7FF);
        assert_eq!(status.faults().len(), StatusBit::iter().count());
    }
}
