//! Decoding of `GET_READINGS` response payloads.

use chrono::NaiveDateTime;
use nom::number::complete::{be_f32, be_u16, be_u32};
use nom::IResult;

use crate::error::ProtocolError;
use crate::protocol::parse::parse_packed_time;

const CHUNK_MARKER: u32 = 0x10;

/// Fixed part of a chunk before the per-channel values: marker, packed
/// time, DIO, two unused bytes, alarm bitmasks, totalizer.
const CHUNK_FIXED_LEN: usize = 28;

/// One timestamped scan from the instrument queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub time: NaiveDateTime,
    /// Digital I/O state word.
    pub dio: u16,
    pub alarm1_bitmask: u32,
    pub alarm2_bitmask: u32,
    pub totalizer: u32,
    /// Per-channel values, in channel order.
    pub values: Vec<f32>,
}

impl Reading {
    /// State of one digital I/O line. `index` in 0..16.
    pub fn dio_status(&self, index: u8) -> bool {
        (u32::from(self.dio) >> index) & 1 != 0
    }

    /// Whether the indexed channel is in alarm 1. `index` in 0..32.
    pub fn is_alarm1(&self, index: u8) -> bool {
        (self.alarm1_bitmask >> index) & 1 != 0
    }

    /// Whether the indexed channel is in alarm 2. `index` in 0..32.
    pub fn is_alarm2(&self, index: u8) -> bool {
        (self.alarm2_bitmask >> index) & 1 != 0
    }

    fn parse(chunk: &[u8], now: NaiveDateTime) -> Result<Self, ProtocolError> {
        if chunk.len() < CHUNK_FIXED_LEN {
            return Err(ProtocolError::Truncated {
                expected: CHUNK_FIXED_LEN,
                actual: chunk.len(),
            });
        }

        let marker = u32::from_be_bytes(chunk[..4].try_into().unwrap());
        if marker != CHUNK_MARKER {
            return Err(ProtocolError::InvalidChunkHeader(marker));
        }

        let (rest, time) = parse_packed_time(now)(&chunk[4..])
            .map_err(|_| ProtocolError::InvalidTimestamp)?;
        let (rest, (dio, _, alarm1_bitmask, alarm2_bitmask, totalizer)) =
            fixed_fields(rest).map_err(|_| ProtocolError::Truncated {
                expected: CHUNK_FIXED_LEN,
                actual: chunk.len(),
            })?;

        // whatever remains of the chunk is per-channel floats
        let (_, values) = values(rest).map_err(|_| ProtocolError::Truncated {
            expected: CHUNK_FIXED_LEN + rest.len(),
            actual: chunk.len(),
        })?;

        Ok(Reading {
            time,
            dio,
            alarm1_bitmask,
            alarm2_bitmask,
            totalizer,
            values,
        })
    }
}

fn fixed_fields(input: &[u8]) -> IResult<&[u8], (u16, &[u8], u32, u32, u32)> {
    nom::sequence::tuple((
        be_u16,
        nom::bytes::complete::take(2usize),
        be_u32,
        be_u32,
        be_u32,
    ))(input)
}

fn values(input: &[u8]) -> IResult<&[u8], Vec<f32>> {
    nom::multi::count(be_f32, input.len() / 4)(input)
}

/// A decoded `GET_READINGS` response.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingBatch {
    pub readings: Vec<Reading>,
    /// Readings still queued inside the instrument.
    pub instrument_queue: u32,
}

impl ReadingBatch {
    /// Decode a whole response payload. `now` anchors the century of the
    /// packed timestamps.
    pub fn parse(payload: &[u8], now: NaiveDateTime) -> Result<Self, ProtocolError> {
        let (chunks, (chunk_length, chunk_count, instrument_queue)) = batch_header(payload)
            .map_err(|_| ProtocolError::Truncated {
                expected: 12,
                actual: payload.len(),
            })?;

        let chunk_length = chunk_length as usize;
        let mut readings = Vec::with_capacity(chunk_count as usize);
        for index in 0..chunk_count as usize {
            let chunk = chunks
                .get(index * chunk_length..(index + 1) * chunk_length)
                .ok_or(ProtocolError::Truncated {
                    expected: 12 + chunk_count as usize * chunk_length,
                    actual: payload.len(),
                })?;
            readings.push(Reading::parse(chunk, now)?);
        }

        Ok(ReadingBatch {
            readings,
            instrument_queue,
        })
    }
}

fn batch_header(input: &[u8]) -> IResult<&[u8], (u32, u32, u32)> {
    nom::sequence::tuple((be_u32, be_u32, be_u32))(input)
}
