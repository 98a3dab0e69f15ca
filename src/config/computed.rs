//! Computed (derived) channels.
//!
//! Computed slots hold an average over a channel bitmask, a difference of
//! two channels, a difference against an averaged bitmask, or a compiled
//! equation. Equation bytecode lives in the auxiliary region of the config
//! payload; the channel record only carries its byte offset.

use crate::equation::Equation;
use crate::error::ConfigError;
use crate::protocol::serialize::Serializer;

use super::channel::ChannelOptions;

#[derive(Debug, Clone, PartialEq)]
enum ComputedFunction {
    Disabled,
    Average {
        channel_bitmask: u32,
    },
    AMinusB {
        channel_a: u16,
        channel_b: u16,
    },
    AMinusAverage {
        channel_a: u16,
        channel_bitmask: u32,
    },
    Equation(Equation),
}

/// One computed channel, validated at construction and immutable after.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedChannel {
    function: ComputedFunction,
    options: ChannelOptions,
}

impl ComputedChannel {
    fn with(function: ComputedFunction, options: ChannelOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self { function, options })
    }

    /// An explicitly unused slot.
    pub fn disabled() -> Self {
        Self {
            function: ComputedFunction::Disabled,
            options: ChannelOptions::default(),
        }
    }

    /// Average of every channel set in the bitmask.
    pub fn average(channel_bitmask: u32, options: ChannelOptions) -> Result<Self, ConfigError> {
        Self::with(ComputedFunction::Average { channel_bitmask }, options)
    }

    /// Difference `A - B` of two channels.
    pub fn a_minus_b(
        channel_a: u16,
        channel_b: u16,
        options: ChannelOptions,
    ) -> Result<Self, ConfigError> {
        Self::with(
            ComputedFunction::AMinusB {
                channel_a,
                channel_b,
            },
            options,
        )
    }

    /// Difference between channel A and the average of the bitmask.
    pub fn a_minus_average(
        channel_a: u16,
        channel_bitmask: u32,
        options: ChannelOptions,
    ) -> Result<Self, ConfigError> {
        Self::with(
            ComputedFunction::AMinusAverage {
                channel_a,
                channel_bitmask,
            },
            options,
        )
    }

    /// A compiled equation channel. The equation must be complete: ended,
    /// with at least one channel reference.
    pub fn equation(equation: Equation, options: ChannelOptions) -> Result<Self, ConfigError> {
        equation.validate()?;
        Self::with(ComputedFunction::Equation(equation), options)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.function, ComputedFunction::Disabled)
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Encode the record, returning the bytes destined for the auxiliary
    /// region. `aux_offset` is where those bytes will land.
    pub(crate) fn encode<S: Serializer>(
        &self,
        ser: &mut S,
        aux_offset: usize,
    ) -> Result<Vec<u8>, ConfigError> {
        let mut aux = Vec::new();
        match &self.function {
            ComputedFunction::Disabled => {
                for _ in 0..5 {
                    ser.write_be_u32(0);
                }
            }
            ComputedFunction::Average { channel_bitmask } => {
                ser.write_be_u32(0x0000_8001);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
                ser.write_be_u32(*channel_bitmask);
            }
            ComputedFunction::AMinusB {
                channel_a,
                channel_b,
            } => {
                ser.write_be_u32(0x0000_8002);
                ser.write_be_u32(0);
                ser.write_be_u32(u32::from(*channel_a));
                ser.write_be_u32(0);
                ser.write_be_u32(u32::from(*channel_b));
            }
            ComputedFunction::AMinusAverage {
                channel_a,
                channel_bitmask,
            } => {
                ser.write_be_u32(0x0000_8003);
                ser.write_be_u32(0);
                ser.write_be_u32(u32::from(*channel_a));
                ser.write_be_u32(0);
                ser.write_be_u32(*channel_bitmask);
            }
            ComputedFunction::Equation(equation) => {
                aux = equation.encode()?;
                ser.write_be_u32(0x0000_8004);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
                ser.write_be_u32(0);
                ser.write_be_u32(aux_offset as u32);
            }
        }
        self.options.write_trailer(ser);
        Ok(aux)
    }
}

#[cfg(test)]
mod test {
    use super::super::channel::CHANNEL_RECORD_LEN;
    use super::*;

    fn encoded(channel: &ComputedChannel, aux_offset: usize) -> (Vec<u8>, Vec<u8>) {
        let mut buf = Vec::new();
        let aux = channel.encode(&mut buf, aux_offset).unwrap();
        (buf, aux)
    }

    fn head_words(buf: &[u8]) -> Vec<u32> {
        buf[..20]
            .chunks(4)
            .map(|w| u32::from_be_bytes(w.try_into().unwrap()))
            .collect()
    }

    fn channel_sum() -> Equation {
        let mut eq = Equation::new();
        eq.push_channel(1)
            .unwrap()
            .push_channel(2)
            .unwrap()
            .add()
            .unwrap()
            .end()
            .unwrap();
        eq
    }

    #[test]
    fn average_head_layout() {
        let channel = ComputedChannel::average(0b1010, Default::default()).unwrap();
        let (buf, aux) = encoded(&channel, 0);
        assert_eq!(buf.len(), CHANNEL_RECORD_LEN);
        assert_eq!(head_words(&buf), [0x8001, 0, 0, 0, 0b1010]);
        assert!(aux.is_empty());
    }

    #[test]
    fn a_minus_b_head_layout() {
        let channel = ComputedChannel::a_minus_b(3, 7, Default::default()).unwrap();
        let (buf, _) = encoded(&channel, 0);
        assert_eq!(head_words(&buf), [0x8002, 0, 3, 0, 7]);
    }

    #[test]
    fn a_minus_average_head_layout() {
        let channel = ComputedChannel::a_minus_average(3, 0b110, Default::default()).unwrap();
        let (buf, _) = encoded(&channel, 0);
        assert_eq!(head_words(&buf), [0x8003, 0, 3, 0, 0b110]);
    }

    #[test]
    fn equation_head_carries_aux_offset() {
        let channel = ComputedChannel::equation(channel_sum(), Default::default()).unwrap();
        let (buf, aux) = encoded(&channel, 24);
        assert_eq!(head_words(&buf), [0x8004, 0, 0, 0, 24]);
        assert_eq!(aux, channel_sum().encode().unwrap());
    }

    #[test]
    fn incomplete_equation_is_rejected() {
        let mut eq = Equation::new();
        eq.push_channel(1).unwrap();
        assert_eq!(
            ComputedChannel::equation(eq, Default::default()),
            Err(ConfigError::MissingEnd)
        );

        assert_eq!(
            ComputedChannel::equation(Equation::new(), Default::default()),
            Err(ConfigError::MissingEnd)
        );
    }
}
