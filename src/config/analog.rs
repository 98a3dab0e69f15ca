//! Analog input channels.
//!
//! Each measurement family encodes a fixed five-word head (type code,
//! range, two auxiliary fields, extra bits) followed by the common trailer.
//! Range codes are the instrument's own.

use crate::error::ConfigError;
use crate::protocol::serialize::Serializer;

use super::channel::ChannelOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OhmsRange {
    Ohms300 = 0x1001,
    Ohms3k = 0x1102,
    Ohms30k = 0x1204,
    Ohms300k = 0x1308,
    Ohms3M = 0x1410,
    Auto = 0x1520,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum VdcRange {
    Millivolts90 = 0x2001,
    Millivolts300 = 0x2102,
    Volts3 = 0x2308,
    Volts30 = 0x2410,
    Auto = 0x2520,
    Volts50 = 0x2640,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum VacRange {
    Millivolts300 = 0x3001,
    Volts3 = 0x3102,
    Volts30 = 0x3204,
    Auto = 0x3308,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CurrentRange {
    Milliamps20 = 0x2102,
    Milliamps100 = 0x2520,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ThermocoupleType {
    J = 0x6001,
    K = 0x6101,
    E = 0x6201,
    T = 0x6301,
    R = 0x6401,
    S = 0x6501,
    B = 0x6601,
    C = 0x6701,
    N = 0x6801,
}

/// RTD conversion curve. Both use the 385 curve shape; the custom variant
/// carries a caller-provided alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RtdRange {
    Fixed385 = 0x5020,
    Custom385 = 0x5021,
}

#[derive(Debug, Clone, PartialEq)]
enum AnalogFunction {
    Disabled,
    Ohms {
        range: OhmsRange,
        four_wire: bool,
    },
    Vdc {
        range: VdcRange,
    },
    Vac {
        range: VacRange,
    },
    Frequency,
    Rtd {
        range: RtdRange,
        alpha: f32,
        r0: f32,
    },
    Thermocouple {
        range: ThermocoupleType,
        open_detect: bool,
    },
    Current {
        range: CurrentRange,
        shunt_resistance: f32,
    },
}

/// One analog input channel, validated at construction and immutable after.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogChannel {
    function: AnalogFunction,
    options: ChannelOptions,
}

impl AnalogChannel {
    fn with(function: AnalogFunction, options: ChannelOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self { function, options })
    }

    /// An explicitly unused slot.
    pub fn disabled() -> Self {
        Self {
            function: AnalogFunction::Disabled,
            options: ChannelOptions::default(),
        }
    }

    /// Resistance measurement. The 300 ohm and 3 kohm ranges need the
    /// four-wire hookup.
    pub fn ohms(
        range: OhmsRange,
        four_wire: bool,
        options: ChannelOptions,
    ) -> Result<Self, ConfigError> {
        if !four_wire && matches!(range, OhmsRange::Ohms300 | OhmsRange::Ohms3k) {
            return Err(ConfigError::TwoWireRangeConflict);
        }
        Self::with(AnalogFunction::Ohms { range, four_wire }, options)
    }

    pub fn vdc(range: VdcRange, options: ChannelOptions) -> Result<Self, ConfigError> {
        Self::with(AnalogFunction::Vdc { range }, options)
    }

    pub fn vac(range: VacRange, options: ChannelOptions) -> Result<Self, ConfigError> {
        Self::with(AnalogFunction::Vac { range }, options)
    }

    pub fn frequency(options: ChannelOptions) -> Result<Self, ConfigError> {
        Self::with(AnalogFunction::Frequency, options)
    }

    /// RTD on the fixed 385 curve. `r0` is the 0 degree resistance in
    /// 10..=1010 ohms.
    pub fn rtd_fixed(r0: f32, options: ChannelOptions) -> Result<Self, ConfigError> {
        Self::rtd(RtdRange::Fixed385, 0.0, r0, options)
    }

    /// RTD with a custom alpha in 0.00374..=0.00393.
    pub fn rtd_custom(alpha: f32, r0: f32, options: ChannelOptions) -> Result<Self, ConfigError> {
        if !(0.00374..=0.00393).contains(&alpha) {
            return Err(ConfigError::AlphaOutOfRange(alpha));
        }
        Self::rtd(RtdRange::Custom385, alpha, r0, options)
    }

    fn rtd(
        range: RtdRange,
        alpha: f32,
        r0: f32,
        options: ChannelOptions,
    ) -> Result<Self, ConfigError> {
        if !(10.0..=1010.0).contains(&r0) {
            return Err(ConfigError::R0OutOfRange(r0));
        }
        Self::with(AnalogFunction::Rtd { range, alpha, r0 }, options)
    }

    pub fn thermocouple(
        range: ThermocoupleType,
        open_detect: bool,
        options: ChannelOptions,
    ) -> Result<Self, ConfigError> {
        Self::with(
            AnalogFunction::Thermocouple { range, open_detect },
            options,
        )
    }

    /// Current measurement through an external shunt of 10..=250 ohms.
    pub fn current(
        range: CurrentRange,
        shunt_resistance: f32,
        options: ChannelOptions,
    ) -> Result<Self, ConfigError> {
        if !(10.0..=250.0).contains(&shunt_resistance) {
            return Err(ConfigError::ShuntOutOfRange(shunt_resistance));
        }
        Self::with(
            AnalogFunction::Current {
                range,
                shunt_resistance,
            },
            options,
        )
    }

    pub fn is_disabled(&self) -> bool {
        self.function == AnalogFunction::Disabled
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub(crate) fn encode<S: Serializer>(&self, ser: &mut S) {
        match &self.function {
            AnalogFunction::Disabled => {
                for _ in 0..5 {
                    ser.write_be_u32(0);
                }
            }
            AnalogFunction::Ohms { range, four_wire } => {
                ser.write_be_u32(0x0000_0001);
                ser.write_be_u32(*range as u32);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
                ser.write_be_u32(0x9000 | u32::from(*four_wire));
            }
            AnalogFunction::Vdc { range } => {
                ser.write_be_u32(0x0000_0002);
                ser.write_be_u32(*range as u32);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
            }
            AnalogFunction::Vac { range } => {
                ser.write_be_u32(0x0000_0004);
                ser.write_be_u32(*range as u32);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
            }
            AnalogFunction::Frequency => {
                ser.write_be_u32(0x0000_0008);
                for _ in 0..4 {
                    ser.write_be_u32(0);
                }
            }
            AnalogFunction::Rtd { range, alpha, r0 } => {
                ser.write_be_u32(0x0000_0010);
                ser.write_be_u32(*range as u32);
                ser.write_be_f32(*alpha);
                ser.write_be_f32(*r0);
                ser.write_be_u32(0x9001);
            }
            AnalogFunction::Thermocouple { range, open_detect } => {
                ser.write_be_u32(0x0000_0020);
                ser.write_be_u32(*range as u32);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
                ser.write_be_u32(u32::from(*open_detect));
            }
            AnalogFunction::Current {
                range,
                shunt_resistance,
            } => {
                ser.write_be_u32(0x0001_0002);
                ser.write_be_u32(*range as u32);
                ser.write_be_f32(*shunt_resistance);
                ser.write_be_u32(0);
                ser.write_be_u32(0x7000 | u32::from(*range == CurrentRange::Milliamps100));
            }
        }
        self.options.write_trailer(ser);
    }
}

#[cfg(test)]
mod test {
    use super::super::channel::CHANNEL_RECORD_LEN;
    use super::*;

    fn encoded(channel: &AnalogChannel) -> Vec<u8> {
        let mut buf = Vec::new();
        channel.encode(&mut buf);
        buf
    }

    fn head_words(buf: &[u8]) -> Vec<u32> {
        buf[..20]
            .chunks(4)
            .map(|w| u32::from_be_bytes(w.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn every_family_encodes_record_sized() {
        let options = ChannelOptions::default;
        let channels = [
            AnalogChannel::disabled(),
            AnalogChannel::ohms(OhmsRange::Ohms30k, false, options()).unwrap(),
            AnalogChannel::vdc(VdcRange::Volts3, options()).unwrap(),
            AnalogChannel::vac(VacRange::Auto, options()).unwrap(),
            AnalogChannel::frequency(options()).unwrap(),
            AnalogChannel::rtd_fixed(100.0, options()).unwrap(),
            AnalogChannel::thermocouple(ThermocoupleType::K, true, options()).unwrap(),
            AnalogChannel::current(CurrentRange::Milliamps20, 50.0, options()).unwrap(),
        ];
        for channel in &channels {
            assert_eq!(encoded(channel).len(), CHANNEL_RECORD_LEN);
        }
    }

    #[test]
    fn ohms_head_layout() {
        let channel = AnalogChannel::ohms(OhmsRange::Ohms300, true, Default::default()).unwrap();
        assert_eq!(head_words(&encoded(&channel)), [1, 0x1001, 0, 0, 0x9001]);

        let channel = AnalogChannel::ohms(OhmsRange::Ohms3M, false, Default::default()).unwrap();
        assert_eq!(head_words(&encoded(&channel)), [1, 0x1410, 0, 0, 0x9000]);
    }

    #[test]
    fn two_wire_ohms_rejects_low_ranges() {
        for range in [OhmsRange::Ohms300, OhmsRange::Ohms3k] {
            assert_eq!(
                AnalogChannel::ohms(range, false, Default::default()),
                Err(ConfigError::TwoWireRangeConflict)
            );
            assert!(AnalogChannel::ohms(range, true, Default::default()).is_ok());
        }
    }

    #[test]
    fn rtd_head_carries_alpha_and_r0() {
        let channel = AnalogChannel::rtd_custom(0.00385, 100.0, Default::default()).unwrap();
        let buf = encoded(&channel);
        assert_eq!(&buf[..8], [0, 0, 0, 0x10, 0, 0, 0x50, 0x21]);
        assert_eq!(f32::from_be_bytes(buf[8..12].try_into().unwrap()), 0.00385);
        assert_eq!(f32::from_be_bytes(buf[12..16].try_into().unwrap()), 100.0);
        assert_eq!(&buf[16..20], [0, 0, 0x90, 0x01]);
    }

    #[test]
    fn rtd_alpha_bounds() {
        for alpha in [0.00374, 0.00393] {
            assert!(AnalogChannel::rtd_custom(alpha, 100.0, Default::default()).is_ok());
        }
        for alpha in [0.00373, 0.00394] {
            assert_eq!(
                AnalogChannel::rtd_custom(alpha, 100.0, Default::default()),
                Err(ConfigError::AlphaOutOfRange(alpha))
            );
        }
    }

    #[test]
    fn rtd_r0_bounds() {
        for r0 in [10.0, 1010.0] {
            assert!(AnalogChannel::rtd_fixed(r0, Default::default()).is_ok());
        }
        for r0 in [9.0, 1011.0] {
            assert_eq!(
                AnalogChannel::rtd_fixed(r0, Default::default()),
                Err(ConfigError::R0OutOfRange(r0))
            );
        }
    }

    #[test]
    fn current_shunt_bounds_and_extra_bits() {
        for shunt in [10.0, 250.0] {
            assert!(AnalogChannel::current(CurrentRange::Milliamps20, shunt, Default::default())
                .is_ok());
        }
        for shunt in [9.0, 251.0] {
            assert_eq!(
                AnalogChannel::current(CurrentRange::Milliamps20, shunt, Default::default()),
                Err(ConfigError::ShuntOutOfRange(shunt))
            );
        }

        let channel =
            AnalogChannel::current(CurrentRange::Milliamps100, 50.0, Default::default()).unwrap();
        let buf = encoded(&channel);
        assert_eq!(head_words(&buf)[0], 0x0001_0002);
        assert_eq!(head_words(&buf)[4], 0x7001);
        assert_eq!(f32::from_be_bytes(buf[8..12].try_into().unwrap()), 50.0);
    }

    #[test]
    fn thermocouple_open_detect_bit() {
        let channel =
            AnalogChannel::thermocouple(ThermocoupleType::J, false, Default::default()).unwrap();
        assert_eq!(head_words(&encoded(&channel)), [0x20, 0x6001, 0, 0, 0]);

        let channel =
            AnalogChannel::thermocouple(ThermocoupleType::N, true, Default::default()).unwrap();
        assert_eq!(head_words(&encoded(&channel)), [0x20, 0x6801, 0, 0, 1]);
    }
}
