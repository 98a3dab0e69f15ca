use chrono::{Datelike, NaiveDate, NaiveDateTime};
use nom::number::complete::be_u32;
use nom::IResult;

use crate::error::ProtocolError;

/// Decode an optional digital-output index from its `1 << i` encoding.
pub fn parse_indexed_bit(input: &[u8]) -> IResult<&[u8], Option<u8>> {
    let (input, word) = be_u32(input)?;
    if word == 0 {
        Ok((input, None))
    } else {
        Ok((input, Some(word.trailing_zeros() as u8)))
    }
}

/// Decode an eight-byte packed time.
///
/// The century is not on the wire and is recovered from `now`: a December
/// timestamp decoded in a January host month belongs to the previous year's
/// century. Byte 4 is ignored.
pub fn parse_packed_time(now: NaiveDateTime) -> impl Fn(&[u8]) -> IResult<&[u8], NaiveDateTime> {
    move |input| {
        let (input, raw) = nom::bytes::complete::take(8usize)(input)?;
        let month = raw[3] as u32;

        let mut century_year = now.year();
        if month == 12 && now.month() == 1 {
            century_year -= 1;
        }
        century_year -= century_year % 100;

        let time = NaiveDate::from_ymd_opt(century_year + raw[6] as i32, month, raw[5] as u32)
            .and_then(|d| d.and_hms_opt(raw[0] as u32, raw[1] as u32, raw[2] as u32));

        match time {
            Some(time) => Ok((input, time)),
            None => Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Verify,
            ))),
        }
    }
}

/// Split a version-info payload into its NUL-separated byte strings.
///
/// Every NUL terminates a blob; a non-empty unterminated tail still counts.
pub fn split_nul_blobs(data: &[u8]) -> Vec<Vec<u8>> {
    let mut blobs: Vec<Vec<u8>> = data.split(|b| *b == 0).map(<[u8]>::to_vec).collect();
    if blobs.last().is_some_and(Vec::is_empty) {
        blobs.pop();
    }
    blobs
}

/// Run a parser over a whole response payload, mapping any failure to a
/// protocol error naming the response.
pub fn expect_response<'a, O, P>(
    what: &'static str,
    mut parser: P,
    input: &'a [u8],
) -> Result<O, ProtocolError>
where
    P: nom::Parser<&'a [u8], O, nom::error::Error<&'a [u8]>>,
{
    parser
        .parse(input)
        .map(|(_, out)| out)
        .map_err(|_| ProtocolError::MalformedResponse(what))
}

#[cfg(test)]
mod test {
    use quickcheck_macros::quickcheck;

    use crate::protocol::serialize::{write_indexed_bit, write_packed_time, Serializer};

    use super::*;

    fn now(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[quickcheck]
    fn indexed_bit_roundtrip(bit: Option<u8>) -> bool {
        let bit = bit.map(|b| b % 32);
        let mut buf = Vec::new();
        write_indexed_bit(&mut buf, bit);
        parse_indexed_bit(&buf) == Ok((&[][..], bit))
    }

    #[quickcheck]
    fn be_u32_roundtrip(val: u32) -> bool {
        let mut buf = Vec::new();
        buf.write_be_u32(val);
        be_u32::<_, nom::error::Error<&[u8]>>(buf.as_slice()) == Ok((&[][..], val))
    }

    #[test]
    fn packed_time_roundtrip() {
        let time = now(2024, 3, 4).date().and_hms_opt(12, 34, 56).unwrap();
        let mut buf = Vec::new();
        write_packed_time(&mut buf, &time);
        let (rest, decoded) = parse_packed_time(now(2024, 3, 10))(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, time);
    }

    #[test]
    fn century_rollover_december_reading_in_january() {
        // A reading stamped December 2099, decoded on a host already in 2100.
        let time = now(2099, 12, 31).date().and_hms_opt(23, 59, 58).unwrap();
        let mut buf = Vec::new();
        write_packed_time(&mut buf, &time);
        let (_, decoded) = parse_packed_time(now(2100, 1, 1))(&buf).unwrap();
        assert_eq!(decoded, time);
    }

    #[test]
    fn packed_time_rejects_bad_date() {
        let raw = [0, 0, 0, 13, 0, 1, 24, 0];
        assert!(parse_packed_time(now(2024, 6, 1))(&raw).is_err());
    }

    #[test]
    fn nul_blobs_match_instrument_conventions() {
        assert_eq!(split_nul_blobs(b""), Vec::<Vec<u8>>::new());
        assert_eq!(split_nul_blobs(b"abc\0def"), vec![b"abc".to_vec(), b"def".to_vec()]);
        assert_eq!(split_nul_blobs(b"abc\0"), vec![b"abc".to_vec()]);
        assert_eq!(
            split_nul_blobs(b"a\0\0b"),
            vec![b"a".to_vec(), b"".to_vec(), b"b".to_vec()]
        );
        assert_eq!(split_nul_blobs(b"a\0\0"), vec![b"a".to_vec(), b"".to_vec()]);
    }
}
