//! Frame layer of the instrument protocol.
//!
//! Every frame starts with the `FELX` magic followed by three big-endian
//! words: sequence id, command (requests) or status (responses), and the
//! total frame length including the 16-byte header.

use nom::number::complete::be_u32;

use crate::error::ProtocolError;

pub mod parse;
pub mod serialize;

pub use serialize::Serializer;

/// Frame magic, `"FELX"`.
pub const FRAME_MAGIC: [u8; 4] = *b"FELX";

/// Fixed frame header length, magic included.
pub const HEADER_LEN: usize = 16;

/// TCP port the instruments listen on.
pub const DEFAULT_PORT: u16 = 4369;

/// Exact length of every `SET_CONFIG` payload.
pub const CONFIG_PAYLOAD_LEN: usize = 2492;

/// Command codes, as sent in the status word of a request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    Ping = 0x00,
    Close = 0x01,
    StatusQuery = 0x02,
    GetReadings = 0x64,
    Start = 0x67,
    Stop = 0x68,
    SetTime = 0x6A,
    QuerySpy = 0x6F,
    ResetTotalizer = 0x71,
    GetVersionInfo = 0x72,
    SetMonitorChannel = 0x75,
    ClearMonitorChannel = 0x76,
    GetBaseChannel = 0x77,
    EnableSpy = 0x7C,
    DisableSpy = 0x7D,
    GetLcVersion = 0x7F,
    SetConfig = 0x81,
}

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// The three words that follow the magic in every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence_id: u32,
    /// Command code in requests; zero for success or an error code in
    /// responses.
    pub status: u32,
    /// Total frame length, header included.
    pub length: u32,
}

impl FrameHeader {
    /// Parse a raw header, checking the magic.
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let (_, header) = header(raw.as_slice())
            .map_err(|_| ProtocolError::InvalidMagic([raw[0], raw[1], raw[2], raw[3]]))?;
        Ok(header)
    }

    /// Number of payload bytes that follow the header.
    pub fn payload_len(&self) -> Result<usize, ProtocolError> {
        (self.length as usize)
            .checked_sub(HEADER_LEN)
            .ok_or(ProtocolError::Truncated {
                expected: HEADER_LEN,
                actual: self.length as usize,
            })
    }
}

fn header(input: &[u8]) -> nom::IResult<&[u8], FrameHeader> {
    let (input, _) = nom::bytes::complete::tag(&FRAME_MAGIC[..])(input)?;
    let (input, sequence_id) = be_u32(input)?;
    let (input, status) = be_u32(input)?;
    let (input, length) = be_u32(input)?;
    Ok((
        input,
        FrameHeader {
            sequence_id,
            status,
            length,
        },
    ))
}

/// Serialize a full request frame.
pub fn write_frame<S: Serializer>(ser: &mut S, sequence_id: u32, command: Command, payload: &[u8]) {
    ser.write_bytes(&FRAME_MAGIC);
    ser.write_be_u32(sequence_id);
    ser.write_be_u32(command.code());
    ser.write_be_u32((payload.len() + HEADER_LEN) as u32);
    ser.write_bytes(payload);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 7, Command::QuerySpy, &[0xde, 0xad]);
        assert_eq!(buf.len(), HEADER_LEN + 2);
        assert_eq!(&buf[..4], b"FELX");

        let header = FrameHeader::parse(buf[..HEADER_LEN].try_into().unwrap()).unwrap();
        assert_eq!(header.sequence_id, 7);
        assert_eq!(header.status, Command::QuerySpy.code());
        assert_eq!(header.payload_len().unwrap(), 2);
        assert_eq!(&buf[HEADER_LEN..], [0xde, 0xad]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let raw = *b"XLEF\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00\x10";
        assert_eq!(
            FrameHeader::parse(&raw),
            Err(ProtocolError::InvalidMagic(*b"XLEF"))
        );
    }

    #[test]
    fn short_length_word_is_rejected() {
        let header = FrameHeader {
            sequence_id: 1,
            status: 0,
            length: 12,
        };
        assert!(header.payload_len().is_err());
    }
}
