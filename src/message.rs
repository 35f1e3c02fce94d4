//! Wire format of a single log message.
//!
//! A message is an immutable, big-endian framed byte buffer. Fields are read
//! at fixed offsets, directly from the buffer:
//!
//! ```text
//! | crc: u32 | magic: i8 | attributes: i8 | [timestamp: i64] |
//! | key_len: i32 | key | value_len: i32 | value |
//! ```
//!
//! - `timestamp` exists only when `magic > 0`.
//! - A length of `-1` means the field is absent; `0` means present and empty.
//! - The CRC-32 covers every byte after the CRC field.
//!
//! Newer versions add fields between `attributes` and `key_len`, a reader of
//! an older version never reads past the fields it knows.

use std::fmt;
use std::io;
use std::io::Read;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::errors::ChecksumMismatch;
use crate::errors::MalformedMessage;
use crate::errors::TimestampUnavailable;

const CRC_SIZE: usize = 4;
const MAGIC_OFFSET: usize = 4;
const ATTRIBUTES_OFFSET: usize = 5;
const TIMESTAMP_OFFSET: usize = 6;
const TIMESTAMP_SIZE: usize = 8;
const LENGTH_SIZE: usize = 4;

/// Length field value of an absent key or value.
const ABSENT: i32 = -1;

/// Size of the smallest valid frame: magic 0, absent key and value.
pub const MIN_MESSAGE_SIZE: usize = 14;

/// One wire-framed log record.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    buf: Vec<u8>,
}

impl Message {
    /// Wraps raw frame bytes without validating them or computing the CRC.
    ///
    /// Field accessors panic if `buf` is not a valid frame; use
    /// [`Message::parse`] for bytes from an untrusted source.
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    /// Wraps raw frame bytes after checking that every length field is
    /// consistent with the buffer size.
    pub fn parse(buf: Vec<u8>) -> Result<Self, io::Error> {
        Self::check_frame(&buf)?;
        Ok(Self { buf })
    }

    /// Builds a frame from its fields and stamps the CRC.
    ///
    /// `timestamp` is only written when `magic_byte > 0`.
    ///
    /// # Panics
    ///
    /// Panics if `key` or `value` is longer than `i32::MAX` bytes.
    pub fn from_parts(
        magic_byte: i8,
        attributes: i8,
        timestamp: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Self {
        let mut buf = Vec::with_capacity(
            MIN_MESSAGE_SIZE
                + TIMESTAMP_SIZE
                + key.map_or(0, |k| k.len())
                + value.map_or(0, |v| v.len()),
        );

        buf.extend_from_slice(&[0; CRC_SIZE]);
        buf.push(magic_byte as u8);
        buf.push(attributes as u8);

        if magic_byte > 0 {
            let mut ts = [0; TIMESTAMP_SIZE];
            BigEndian::write_i64(&mut ts, timestamp);
            buf.extend_from_slice(&ts);
        }

        for field in [key, value] {
            let mut len = [0; LENGTH_SIZE];
            match field {
                Some(b) => {
                    BigEndian::write_i32(&mut len, field_len(b.len()));
                    buf.extend_from_slice(&len);
                    buf.extend_from_slice(b);
                }
                None => {
                    BigEndian::write_i32(&mut len, ABSENT);
                    buf.extend_from_slice(&len);
                }
            }
        }

        let mut msg = Self { buf };
        msg.stamp_crc();
        msg
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// The stored checksum, as a signed 32-bit integer.
    pub fn crc(&self) -> i32 {
        BigEndian::read_u32(&self.buf[0..CRC_SIZE]) as i32
    }

    /// Format version of this message.
    pub fn magic_byte(&self) -> i8 {
        self.buf[MAGIC_OFFSET] as i8
    }

    pub fn attributes(&self) -> i8 {
        self.buf[ATTRIBUTES_OFFSET] as i8
    }

    pub fn has_timestamp(&self) -> bool {
        self.magic_byte() > 0
    }

    /// Returns the timestamp of a message with `magic_byte > 0`.
    ///
    /// Calling it on a version 0 message is a caller bug: the field does not
    /// exist in that format, and [`TimestampUnavailable`] is returned.
    pub fn timestamp(&self) -> Result<i64, TimestampUnavailable> {
        if !self.has_timestamp() {
            return Err(TimestampUnavailable::new(self.magic_byte()));
        }

        let end = TIMESTAMP_OFFSET + TIMESTAMP_SIZE;
        Ok(BigEndian::read_i64(&self.buf[TIMESTAMP_OFFSET..end]))
    }

    /// Returns `(start, end, size)` of the key field, where `start` is the
    /// position of the length field and `size` is `-1` for an absent key.
    pub(crate) fn key_offsets(&self) -> (i32, i32, i32) {
        let start = Self::key_start(self.magic_byte()) as i32;
        self.field_offsets(start)
    }

    /// Returns `(start, end, size)` of the value field; it starts where the
    /// key ends.
    pub(crate) fn value_offsets(&self) -> (i32, i32, i32) {
        let (_, key_end, _) = self.key_offsets();
        self.field_offsets(key_end)
    }

    fn field_offsets(&self, start: i32) -> (i32, i32, i32) {
        let s = start as usize;
        let len = BigEndian::read_i32(&self.buf[s..s + LENGTH_SIZE]);
        let size = if len == ABSENT { ABSENT } else { len };
        let end = start + LENGTH_SIZE as i32 + size.max(0);
        (start, end, size)
    }

    pub fn key(&self) -> Option<&[u8]> {
        let (start, end, size) = self.key_offsets();
        self.field(start, end, size)
    }

    pub fn value(&self) -> Option<&[u8]> {
        let (start, end, size) = self.value_offsets();
        self.field(start, end, size)
    }

    fn field(&self, start: i32, end: i32, size: i32) -> Option<&[u8]> {
        if size == ABSENT {
            return None;
        }
        let data_start = start as usize + LENGTH_SIZE;
        Some(&self.buf[data_start..end as usize])
    }

    /// Total encoded length, derived from the length fields.
    pub fn size(&self) -> i32 {
        let (_, end, _) = self.value_offsets();
        end
    }

    /// CRC-32 of every byte following the CRC field.
    pub fn compute_crc(&self) -> u32 {
        crc32fast::hash(&self.buf[CRC_SIZE..])
    }

    /// Checks the stored CRC against the one computed over the frame.
    pub fn verify_crc(&self) -> Result<(), io::Error> {
        let stored = self.crc() as u32;
        let computed = self.compute_crc();
        if stored != computed {
            return Err(ChecksumMismatch::new(stored, computed).into());
        }
        Ok(())
    }

    /// Recomputes the CRC and writes it into the frame.
    pub fn stamp_crc(&mut self) {
        let crc = self.compute_crc();
        BigEndian::write_u32(&mut self.buf[0..CRC_SIZE], crc);
    }

    fn key_start(magic_byte: i8) -> usize {
        if magic_byte > 0 {
            TIMESTAMP_OFFSET + TIMESTAMP_SIZE
        } else {
            TIMESTAMP_OFFSET
        }
    }

    /// Validates the layout of a frame without touching the CRC.
    pub(crate) fn check_frame(buf: &[u8]) -> Result<(), MalformedMessage> {
        if buf.len() < TIMESTAMP_OFFSET {
            return Err(MalformedMessage::new(format!(
                "frame of {} bytes is shorter than the header",
                buf.len()
            )));
        }

        let key_start = Self::key_start(buf[MAGIC_OFFSET] as i8);
        let key_end = Self::check_field(buf, key_start, "key")?;
        let value_end = Self::check_field(buf, key_end, "value")?;

        if value_end != buf.len() {
            return Err(MalformedMessage::new(format!(
                "frame ends at {} but buffer has {} bytes",
                value_end,
                buf.len()
            )));
        }

        Ok(())
    }

    /// Returns the end of the field whose length is at `start`.
    fn check_field(
        buf: &[u8],
        start: usize,
        name: &str,
    ) -> Result<usize, MalformedMessage> {
        let data_start = start + LENGTH_SIZE;
        if data_start > buf.len() {
            return Err(MalformedMessage::new(format!(
                "{} length at {} is beyond the {} byte buffer",
                name,
                start,
                buf.len()
            )));
        }

        let len = BigEndian::read_i32(&buf[start..data_start]);
        if len < ABSENT {
            return Err(MalformedMessage::new(format!(
                "invalid {} length: {}",
                name, len
            )));
        }

        let end = data_start + len.max(0) as usize;
        if end > buf.len() {
            return Err(MalformedMessage::new(format!(
                "{} of {} bytes at {} is beyond the {} byte buffer",
                name,
                len,
                data_start,
                buf.len()
            )));
        }

        Ok(end)
    }

    /// Reads a length field and the data it announces, appending both to
    /// `buf`.
    ///
    /// The length is not trusted for allocation: data is read through
    /// `take()`, a short read is an `UnexpectedEof`.
    fn read_field<R: io::Read>(
        r: &mut R,
        buf: &mut Vec<u8>,
        name: &str,
    ) -> Result<(), io::Error> {
        let len = r.read_i32::<BigEndian>()?;
        buf.write_i32::<BigEndian>(len)?;

        if len < ABSENT {
            return Err(MalformedMessage::new(format!(
                "invalid {} length: {}",
                name, len
            ))
            .into());
        }

        if len > 0 {
            let n = (&mut *r).take(len as u64).read_to_end(buf)?;
            if n != len as usize {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} expects {} bytes, got {}", name, len, n),
                ));
            }
        }

        Ok(())
    }
}

/// Length of a key or value as stored in a frame.
fn field_len(len: usize) -> i32 {
    match i32::try_from(len) {
        Ok(n) => n,
        Err(_) => panic!("field of {} bytes does not fit in a frame", len),
    }
}

impl codeq::Encode for Message {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        w.write_all(&self.buf)?;
        Ok(self.buf.len())
    }
}

/// Reads exactly one frame. The CRC is not verified here, see
/// [`Message::verify_crc`].
impl codeq::Decode for Message {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let mut buf = vec![0; TIMESTAMP_OFFSET];
        r.read_exact(&mut buf)?;

        if (buf[MAGIC_OFFSET] as i8) > 0 {
            let mut ts = [0; TIMESTAMP_SIZE];
            r.read_exact(&mut ts)?;
            buf.extend_from_slice(&ts);
        }

        Self::read_field(&mut r, &mut buf, "key")?;
        Self::read_field(&mut r, &mut buf, "value")?;

        Ok(Self { buf })
    }
}

struct DisplayBytes<'a>(Option<&'a [u8]>);

impl fmt::Display for DisplayBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => write!(f, "None"),
            Some(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{:?}", s),
                Err(_) => write!(f, "{:?}", b),
            },
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(v{}){{crc: {:#010x}, attributes: {}",
            self.magic_byte(),
            self.crc() as u32,
            self.attributes()
        )?;
        if let Ok(ts) = self.timestamp() {
            write!(f, ", timestamp: {}", ts)?;
        }
        write!(
            f,
            ", key: {}, value: {}}}",
            DisplayBytes(self.key()),
            DisplayBytes(self.value())
        )
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if Self::check_frame(&self.buf).is_err() {
            return f.debug_tuple("Message").field(&self.buf).finish();
        }
        write!(f, "{}", self)
    }
}
