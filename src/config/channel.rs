use crate::error::ConfigError;
use crate::protocol::serialize::{write_indexed_bit, Serializer};

/// Encoded size of one channel record: five head words plus the common
/// trailer.
pub const CHANNEL_RECORD_LEN: usize = 48;

/// Alarm comparison modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum AlarmMode {
    #[default]
    Off = 0x00,
    High = 0x01,
    Low = 0x02,
}

/// Settings shared by every channel: alarm behavior and the `y = m*x + b`
/// scaling applied to readings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOptions {
    /// Channel participates in the alarm trigger.
    pub use_as_alarm_trigger: bool,
    pub alarm1_mode: AlarmMode,
    pub alarm2_mode: AlarmMode,
    pub alarm1_level: f32,
    pub alarm2_level: f32,
    /// Digital output raised by alarm 1, as a bit index in 0..=31.
    pub alarm1_digital: Option<u8>,
    /// Digital output raised by alarm 2, as a bit index in 0..=31.
    pub alarm2_digital: Option<u8>,
    pub multiplier: f32,
    pub offset: f32,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            use_as_alarm_trigger: true,
            alarm1_mode: AlarmMode::Off,
            alarm2_mode: AlarmMode::Off,
            alarm1_level: 0.0,
            alarm2_level: 0.0,
            alarm1_digital: None,
            alarm2_digital: None,
            multiplier: 1.0,
            offset: 0.0,
        }
    }
}

impl ChannelOptions {
    /// Alarm word: bit 0 = alarm trigger participation, bits 1-2 = alarm-1
    /// mode, bits 3-4 = alarm-2 mode.
    pub fn alarm_bits(&self) -> u32 {
        let mut bits = u32::from(self.use_as_alarm_trigger);
        bits |= (self.alarm1_mode as u32) << 1;
        bits |= (self.alarm2_mode as u32) << 3;
        bits
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for digital in [self.alarm1_digital, self.alarm2_digital].into_iter().flatten() {
            if digital > 31 {
                return Err(ConfigError::DigitalIndexOutOfRange(digital));
            }
        }
        Ok(())
    }

    pub(crate) fn write_trailer<S: Serializer>(&self, ser: &mut S) {
        ser.write_be_u32(self.alarm_bits());
        ser.write_be_f32(self.alarm1_level);
        ser.write_be_f32(self.alarm2_level);
        write_indexed_bit(ser, self.alarm1_digital);
        write_indexed_bit(ser, self.alarm2_digital);
        ser.write_be_f32(self.multiplier);
        ser.write_be_f32(self.offset);
    }
}

/// The record used to pad unassigned channel slots: a zeroed head followed
/// by the default trailer.
pub(crate) fn write_disabled_record<S: Serializer>(ser: &mut S) {
    for _ in 0..5 {
        ser.write_be_u32(0);
    }
    ChannelOptions::default().write_trailer(ser);
}
