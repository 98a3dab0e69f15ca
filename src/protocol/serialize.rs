use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, Timelike};

/// A sink for the instrument's big-endian wire encoding.
///
/// Everything can be written in terms of [Serializer::write_u8], but
/// payloads are built in memory, so [`Vec<u8>`] is the implementation that
/// actually gets used.
pub trait Serializer {
    fn write_u8(&mut self, val: u8);

    fn write_bytes(&mut self, val: &[u8]) {
        for b in val.iter() {
            self.write_u8(*b);
        }
    }

    fn write_be_u16(&mut self, val: u16) {
        self.write_bytes(&val.to_be_bytes());
    }

    fn write_be_u32(&mut self, val: u32) {
        self.write_bytes(&val.to_be_bytes());
    }

    fn write_be_f32(&mut self, val: f32) {
        self.write_bytes(&val.to_be_bytes());
    }

    fn write_be_f64(&mut self, val: f64) {
        self.write_bytes(&val.to_be_bytes());
    }
}

impl<S> Serializer for &mut S
where
    S: Serializer,
{
    fn write_u8(&mut self, val: u8) {
        (*self).write_u8(val)
    }

    fn write_bytes(&mut self, val: &[u8]) {
        (*self).write_bytes(val)
    }
}

impl Serializer for Vec<u8> {
    fn write_u8(&mut self, val: u8) {
        self.push(val);
    }

    fn write_bytes(&mut self, val: &[u8]) {
        self.extend_from_slice(val);
    }
}

/// Encode an optional digital-output index: `None` is the zero word,
/// `Some(i)` is `1 << i`.
pub fn write_indexed_bit<S: Serializer>(ser: &mut S, bit: Option<u8>) {
    match bit {
        None => ser.write_be_u32(0),
        Some(i) => ser.write_be_u32(1 << i),
    }
}

/// Encode a wall-clock time into the instrument's eight-byte packed layout.
///
/// Byte 4 is not interpreted by any known firmware; it is written as 0x08
/// because that is what the instrument's own tooling sends.
pub fn write_packed_time<S: Serializer>(ser: &mut S, time: &NaiveDateTime) {
    ser.write_bytes(&[
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        time.month() as u8,
        0x08,
        time.day() as u8,
        (time.year() % 100) as u8,
        0x00,
    ]);
}

/// The millisecond word that accompanies a packed time.
pub fn time_millis(time: &NaiveDateTime) -> u32 {
    time.nanosecond() / 1_000_000
}

/// Encode a duration as four words: whole hours, minutes, seconds and
/// milliseconds components.
pub fn write_timedelta<S: Serializer>(ser: &mut S, delta: Duration) {
    let total_seconds = delta.as_secs();
    ser.write_be_u32((total_seconds / 3600) as u32);
    ser.write_be_u32(((total_seconds / 60) % 60) as u32);
    ser.write_be_u32((total_seconds % 60) as u32);
    ser.write_be_u32(delta.subsec_millis());
}

#[cfg(test)]
mod test {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut buf = Vec::new();
        buf.write_be_u16(0x0102);
        buf.write_be_u32(0x03040506);
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn floats_are_big_endian() {
        let mut buf = Vec::new();
        buf.write_be_f32(1.0);
        assert_eq!(buf, [0x3f, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn indexed_bit_none_is_zero() {
        let mut buf = Vec::new();
        write_indexed_bit(&mut buf, None);
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn indexed_bit_is_shifted() {
        let mut buf = Vec::new();
        write_indexed_bit(&mut buf, Some(3));
        assert_eq!(buf, [0, 0, 0, 8]);
    }

    #[test]
    fn packed_time_layout() {
        let time = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_milli_opt(12, 34, 56, 789)
            .unwrap();
        let mut buf = Vec::new();
        write_packed_time(&mut buf, &time);
        assert_eq!(buf, [12, 34, 56, 3, 0x08, 4, 24, 0]);
        assert_eq!(time_millis(&time), 789);
    }

    #[test]
    fn timedelta_components() {
        let mut buf = Vec::new();
        write_timedelta(&mut buf, Duration::from_millis(2 * 3600_000 + 3 * 60_000 + 4_000 + 56));
        let mut expect = Vec::new();
        expect.write_be_u32(2);
        expect.write_be_u32(3);
        expect.write_be_u32(4);
        expect.write_be_u32(56);
        assert_eq!(buf, expect);
    }
}
