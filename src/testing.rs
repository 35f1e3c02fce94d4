use byteorder::BigEndian;
use byteorder::WriteBytesExt;

use crate::Message;

/// Build a frame by hand, with a dummy CRC `0x12345678`.
///
/// Unlike [`Message::from_parts`], the CRC is not computed, so the result
/// can be used to test checksum verification.
#[allow(dead_code)]
pub(crate) fn raw_message(
    magic_byte: i8,
    attributes: i8,
    timestamp: i64,
    key: Option<&[u8]>,
    value: Option<&[u8]>,
) -> Message {
    let mut buf = Vec::new();

    buf.write_u32::<BigEndian>(0x12345678).unwrap();
    buf.write_i8(magic_byte).unwrap();
    buf.write_i8(attributes).unwrap();

    if magic_byte > 0 {
        buf.write_i64::<BigEndian>(timestamp).unwrap();
    }

    for field in [key, value] {
        match field {
            Some(b) => {
                buf.write_i32::<BigEndian>(b.len() as i32).unwrap();
                buf.extend_from_slice(b);
            }
            None => {
                buf.write_u32::<BigEndian>(0xFFFFFFFF).unwrap();
            }
        }
    }

    Message::new(buf)
}

/// Build a version 1 message with a string key and value.
#[allow(dead_code)]
pub(crate) fn kv_message(key: impl ToString, value: impl ToString) -> Message {
    let key = key.to_string();
    let value = value.to_string();
    Message::from_parts(
        1,
        0,
        1_000,
        Some(key.as_bytes()),
        Some(value.as_bytes()),
    )
}

/// Create a string
#[allow(dead_code)]
pub(crate) fn ss(x: impl ToString) -> String {
    x.to_string()
}
