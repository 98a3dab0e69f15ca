//! Error taxonomy for the driver.

use crate::equation::compiler::ParseError;
use crate::equation::Opcode;

/// Errors raised while constructing channels, equations or configurations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("two-wire ohms cannot use the 300 ohm or 3 kohm ranges")]
    TwoWireRangeConflict,

    #[error("RTD alpha {0} outside 0.00374..=0.00393")]
    AlphaOutOfRange(f32),

    #[error("RTD r0 {0} outside 10..=1010 ohms")]
    R0OutOfRange(f32),

    #[error("current shunt {0} outside 10..=250 ohms")]
    ShuntOutOfRange(f32),

    #[error("digital output index {0} outside 0..=31")]
    DigitalIndexOutOfRange(u8),

    #[error("too many analog channels ({0}, limit 20)")]
    TooManyAnalogChannels(usize),

    #[error("too many computed channels ({0}, limit 10)")]
    TooManyComputedChannels(usize),

    #[error("config payload too large ({0} bytes, limit 2492; too many equations?)")]
    PayloadTooLarge(usize),

    #[error("stack underflow for opcode {opcode:?} (expected >= {expected} elements, got {depth})")]
    StackUnderflow {
        opcode: Opcode,
        expected: u32,
        depth: i32,
    },

    #[error("stack underflow for equation append (expected >= {expected} elements, got {depth})")]
    AppendUnderflow { expected: i32, depth: i32 },

    #[error("cannot add operation to equation after end opcode")]
    OperationAfterEnd,

    #[error("invalid stack depth at end of equation (expected 1, got {0})")]
    BadEndDepth(i32),

    #[error("equation is missing end opcode")]
    MissingEnd,

    #[error("equation requires at least one channel reference")]
    MissingChannelReference,

    #[error("valid equation input stack depth must be 0")]
    NonzeroInputDepth,
}

/// Errors in the framing or in response payload layouts. These are
/// unrecoverable for the session; the reader closes it from inside.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid frame magic {0:02x?}")]
    InvalidMagic([u8; 4]),

    #[error("truncated frame (expected {expected} bytes, got {actual})")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid reading chunk header 0x{0:08x}")]
    InvalidChunkHeader(u32),

    #[error("timestamp does not name a valid calendar date")]
    InvalidTimestamp,

    #[error("malformed {0} response payload")]
    MalformedResponse(&'static str),
}

/// Any error the driver can produce.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Non-zero status word in a response frame.
    #[error("instrument returned error 0x{code:08x}")]
    Instrument { code: u32, payload: Vec<u8> },

    /// A `SET_CONFIG` rejection for a layout that disables a channel and
    /// enables a later one. Some firmware revisions require channels to be
    /// used sequentially starting with 1.
    #[error(
        "possibly unsupported channel layout: the configuration disables some \
         channels but enables later ones, which some instruments reject; try \
         using channels sequentially starting with 1 ({0})"
    )]
    UnsupportedChannelLayout(#[source] Box<Error>),

    #[error("not connected")]
    NotConnected,

    #[error("session closed")]
    SessionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
