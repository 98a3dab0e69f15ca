//! Instrument configuration and the `SET_CONFIG` payload assembler.

use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol::serialize::Serializer;
use crate::protocol::CONFIG_PAYLOAD_LEN;

pub mod analog;
pub mod channel;
pub mod computed;

pub use analog::{
    AnalogChannel, CurrentRange, OhmsRange, RtdRange, ThermocoupleType, VacRange, VdcRange,
};
pub use channel::{AlarmMode, ChannelOptions, CHANNEL_RECORD_LEN};
pub use computed::ComputedChannel;

/// Analog input slots per instrument.
pub const MAX_ANALOG_CHANNELS: usize = 20;

/// Computed slots per instrument.
pub const MAX_COMPUTED_CHANNELS: usize = 10;

const BIT_FAHRENHEIT: u32 = 0x0004;
const BIT_TRIGGER_OUT: u32 = 0x0008;
const BIT_DRIFT_CORRECTION: u32 = 0x0010;
const BIT_TOTALIZER_DEBOUNCE: u32 = 0x0020;

/// Scan speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Speed {
    #[default]
    Slow,
    Medium,
    Fast,
}

impl Speed {
    fn bits(self) -> u32 {
        match self {
            Speed::Slow => 0x0000,
            Speed::Medium => 0x0001,
            Speed::Fast => 0x0002,
        }
    }
}

/// Acquisition trigger sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Trigger {
    Interval = 0x0040,
    Alarm = 0x0080,
    External = 0x0100,
}

/// A complete instrument configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub speed: Speed,
    pub temperature_fahrenheit: bool,
    pub trigger_out: bool,
    /// Forced on unless the speed is [Speed::Fast].
    pub drift_correction: bool,
    pub totalizer_debounce: bool,
    pub triggers: Vec<Trigger>,

    pub interval_time: Duration,
    pub alarm_time: Duration,
    /// Undocumented third period at header offset 48. The instrument's own
    /// tooling always sends 100 ms.
    pub unknown3_time: Duration,

    pub analog_channels: Vec<AnalogChannel>,
    pub computed_channels: Vec<ComputedChannel>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            speed: Speed::Slow,
            temperature_fahrenheit: false,
            trigger_out: false,
            drift_correction: true,
            totalizer_debounce: true,
            triggers: vec![Trigger::Interval],
            interval_time: Duration::from_secs(1),
            alarm_time: Duration::from_secs(1),
            unknown3_time: Duration::from_millis(100),
            analog_channels: Vec::new(),
            computed_channels: Vec::new(),
        }
    }
}

/// An assembled `SET_CONFIG` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedConfig {
    /// Exactly [CONFIG_PAYLOAD_LEN] bytes.
    pub payload: Vec<u8>,
    /// An enabled slot follows a disabled one somewhere in the layout.
    /// Some firmware revisions reject such configurations.
    pub interleaved: bool,
}

impl Configuration {
    /// The global header bits word.
    pub fn bits(&self) -> u32 {
        let mut bits = self.speed.bits();
        if self.drift_correction || self.speed != Speed::Fast {
            bits |= BIT_DRIFT_CORRECTION;
        }
        if self.trigger_out {
            bits |= BIT_TRIGGER_OUT;
        }
        if self.temperature_fahrenheit {
            bits |= BIT_FAHRENHEIT;
        }
        if self.totalizer_debounce {
            bits |= BIT_TOTALIZER_DEBOUNCE;
        }
        for trigger in &self.triggers {
            bits |= *trigger as u32;
        }
        bits
    }

    fn write_period<S: Serializer>(ser: &mut S, period: Duration) {
        ser.write_be_u32(period.as_secs() as u32);
        ser.write_be_u32(period.subsec_millis());
    }

    /// Assemble the fixed-size `SET_CONFIG` payload: global header, 20
    /// analog records, 10 computed records, the auxiliary region, zero
    /// padding.
    pub fn encode(&self) -> Result<EncodedConfig, ConfigError> {
        if self.analog_channels.len() > MAX_ANALOG_CHANNELS {
            return Err(ConfigError::TooManyAnalogChannels(
                self.analog_channels.len(),
            ));
        }
        if self.computed_channels.len() > MAX_COMPUTED_CHANNELS {
            return Err(ConfigError::TooManyComputedChannels(
                self.computed_channels.len(),
            ));
        }

        let mut payload = Vec::with_capacity(CONFIG_PAYLOAD_LEN);
        payload.write_be_u32(self.bits());
        payload.write_be_u32(0);
        payload.write_be_u32(0);
        Self::write_period(&mut payload, self.interval_time);
        payload.write_be_u32(0);
        payload.write_be_u32(0);
        Self::write_period(&mut payload, self.alarm_time);
        payload.write_be_u32(0);
        payload.write_be_u32(0);
        payload.write_be_u32(0);
        payload.write_be_u32(self.unknown3_time.as_millis() as u32);

        let mut aux = Vec::new();
        let mut interleaved = false;

        let mut saw_disabled = false;
        for slot in 0..MAX_ANALOG_CHANNELS {
            match self.analog_channels.get(slot) {
                Some(chan) if !chan.is_disabled() => {
                    if saw_disabled {
                        interleaved = true;
                    }
                    chan.encode(&mut payload);
                }
                _ => {
                    saw_disabled = true;
                    channel::write_disabled_record(&mut payload);
                }
            }
        }

        let mut saw_disabled = false;
        for slot in 0..MAX_COMPUTED_CHANNELS {
            match self.computed_channels.get(slot) {
                Some(chan) if !chan.is_disabled() => {
                    if saw_disabled {
                        interleaved = true;
                    }
                    let equation = chan.encode(&mut payload, aux.len())?;
                    aux.extend_from_slice(&equation);
                }
                _ => {
                    saw_disabled = true;
                    channel::write_disabled_record(&mut payload);
                }
            }
        }

        payload.extend_from_slice(&aux);

        if payload.len() > CONFIG_PAYLOAD_LEN {
            return Err(ConfigError::PayloadTooLarge(payload.len()));
        }
        payload.resize(CONFIG_PAYLOAD_LEN, 0);

        Ok(EncodedConfig {
            payload,
            interleaved,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::equation::Equation;

    use super::*;

    fn words(buf: &[u8]) -> Vec<u32> {
        buf.chunks(4)
            .map(|w| u32::from_be_bytes(w.try_into().unwrap()))
            .collect()
    }

    fn disabled_record() -> Vec<u8> {
        let mut buf = Vec::new();
        channel::write_disabled_record(&mut buf);
        buf
    }

    #[test]
    fn default_bits() {
        // slow speed, drift correction, totalizer debounce, interval trigger
        assert_eq!(Configuration::default().bits(), 0x70);
    }

    #[test]
    fn drift_correction_forced_unless_fast() {
        let config = Configuration {
            speed: Speed::Medium,
            drift_correction: false,
            ..Default::default()
        };
        assert_ne!(config.bits() & BIT_DRIFT_CORRECTION, 0);

        let config = Configuration {
            speed: Speed::Fast,
            drift_correction: false,
            ..Default::default()
        };
        assert_eq!(config.bits() & BIT_DRIFT_CORRECTION, 0);
        assert_ne!(config.bits() & 0x0002, 0);
    }

    #[test]
    fn trigger_and_unit_bits() {
        let config = Configuration {
            temperature_fahrenheit: true,
            trigger_out: true,
            triggers: vec![Trigger::Interval, Trigger::Alarm, Trigger::External],
            ..Default::default()
        };
        assert_eq!(config.bits(), 0x10 | 0x20 | 0x04 | 0x08 | 0x40 | 0x80 | 0x100);
    }

    #[test]
    fn minimal_config_layout() {
        let encoded = Configuration::default().encode().unwrap();
        assert_eq!(encoded.payload.len(), CONFIG_PAYLOAD_LEN);
        assert!(!encoded.interleaved);

        // 13-word global header: bits, two zeros, interval, alarm and the
        // constant 100 ms third period
        assert_eq!(
            words(&encoded.payload[..52]),
            [0x70, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0x64]
        );

        // 30 disabled channel records
        let record = disabled_record();
        for slot in 0..30 {
            let at = 52 + slot * CHANNEL_RECORD_LEN;
            assert_eq!(&encoded.payload[at..at + CHANNEL_RECORD_LEN], record, "slot {slot}");
        }

        // zero padding to the envelope
        assert!(encoded.payload[52 + 30 * CHANNEL_RECORD_LEN..]
            .iter()
            .all(|b| *b == 0));
    }

    #[test]
    fn interval_encodes_seconds_and_millis() {
        let config = Configuration {
            interval_time: Duration::from_millis(2500),
            ..Default::default()
        };
        let encoded = config.encode().unwrap();
        assert_eq!(words(&encoded.payload[12..20]), [2, 500]);
    }

    #[test]
    fn too_many_channels() {
        let config = Configuration {
            analog_channels: vec![AnalogChannel::disabled(); MAX_ANALOG_CHANNELS + 1],
            ..Default::default()
        };
        assert_eq!(
            config.encode(),
            Err(ConfigError::TooManyAnalogChannels(21))
        );

        let config = Configuration {
            computed_channels: vec![ComputedChannel::disabled(); MAX_COMPUTED_CHANNELS + 1],
            ..Default::default()
        };
        assert_eq!(
            config.encode(),
            Err(ConfigError::TooManyComputedChannels(11))
        );
    }

    fn vdc() -> AnalogChannel {
        AnalogChannel::vdc(VdcRange::Volts3, Default::default()).unwrap()
    }

    #[test]
    fn interleaved_layouts_are_flagged() {
        let config = Configuration {
            analog_channels: vec![AnalogChannel::disabled(), vdc()],
            ..Default::default()
        };
        assert!(config.encode().unwrap().interleaved);

        let config = Configuration {
            analog_channels: vec![vdc(), vdc()],
            ..Default::default()
        };
        assert!(!config.encode().unwrap().interleaved);

        // trailing padding after the last enabled slot is not a gap
        let config = Configuration {
            analog_channels: vec![vdc()],
            computed_channels: vec![ComputedChannel::average(1, Default::default()).unwrap()],
            ..Default::default()
        };
        assert!(!config.encode().unwrap().interleaved);
    }

    fn equation_channel(sources: u16) -> ComputedChannel {
        let mut eq = Equation::new();
        eq.push_channel(1).unwrap();
        for channel in 2..=sources {
            eq.push_channel(channel).unwrap().add().unwrap();
        }
        eq.end().unwrap();
        ComputedChannel::equation(eq, Default::default()).unwrap()
    }

    #[test]
    fn equations_land_in_aux_region_by_offset() {
        let first = equation_channel(2);
        let second = equation_channel(3);
        let config = Configuration {
            computed_channels: vec![first, second],
            ..Default::default()
        };
        let encoded = config.encode().unwrap();

        // equation records are computed slots 0 and 1
        let computed_base = 52 + MAX_ANALOG_CHANNELS * CHANNEL_RECORD_LEN;
        let first_head = &encoded.payload[computed_base..computed_base + 20];
        assert_eq!(words(first_head), [0x8004, 0, 0, 0, 0]);

        let first_len = equation_channel(2)
            .encode(&mut Vec::new(), 0)
            .unwrap()
            .len();
        let second_head =
            &encoded.payload[computed_base + CHANNEL_RECORD_LEN..computed_base + CHANNEL_RECORD_LEN + 20];
        assert_eq!(words(second_head), [0x8004, 0, 0, 0, first_len as u32]);

        // aux region sits right after the channel records
        let aux_base = 52 + 30 * CHANNEL_RECORD_LEN;
        let first_bytes = equation_channel(2).encode(&mut Vec::new(), 0).unwrap();
        assert_eq!(
            &encoded.payload[aux_base..aux_base + first_bytes.len()],
            first_bytes
        );
    }

    #[test]
    fn oversized_aux_region_is_rejected() {
        // ten equations of ~200 bytes each overflow the 1000-byte slack
        let config = Configuration {
            computed_channels: vec![equation_channel(50); MAX_COMPUTED_CHANNELS],
            ..Default::default()
        };
        assert!(matches!(
            config.encode(),
            Err(ConfigError::PayloadTooLarge(_))
        ));
    }
}
