//! WAL record types and framing

use crate::{Metric, MetricKind, Result, TallyError};
use bytes::{BufMut, Bytes, BytesMut};

/// Checksum field width
const CHECKSUM_LEN: usize = 4;

/// Checksum plus operation byte
pub(crate) const HEADER_LEN: usize = CHECKSUM_LEN + 1;

/// Smallest frame: header, one varint byte, one payload byte
const MIN_FRAME_LEN: usize = HEADER_LEN + 2;

/// Longest encoding of a 64-bit varint
pub(crate) const MAX_VARINT_LEN: usize = 10;

/// What a record does to the index on replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Accumulate a counter delta
    Add = 1,
    /// Overwrite a gauge
    Set = 2,
}

impl TryFrom<u8> for Operation {
    type Error = TallyError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Operation::Add),
            2 => Ok(Operation::Set),
            _ => Err(TallyError::CorruptRecord(format!(
                "invalid operation byte: {value:#04x}"
            ))),
        }
    }
}

impl Operation {
    /// The metric kind this operation applies to
    pub fn kind(self) -> MetricKind {
        match self {
            Operation::Add => MetricKind::Counter,
            Operation::Set => MetricKind::Gauge,
        }
    }
}

/// A single logged mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub op: Operation,
    pub metric: Metric,
}

impl WalRecord {
    pub fn new(op: Operation, metric: Metric) -> Self {
        Self { op, metric }
    }

    /// Pick the operation from the metric's kind
    pub fn for_metric(metric: Metric) -> Result<Self> {
        let op = match metric.kind() {
            MetricKind::Counter => Operation::Add,
            MetricKind::Gauge => Operation::Set,
            MetricKind::Unknown => {
                return Err(TallyError::Encoding(format!(
                    "metric {:?} has no kind",
                    metric.name()
                )))
            }
        };
        Ok(Self { op, metric })
    }

    /// Serialize into a checksummed frame.
    ///
    /// Format:
    /// - 4 bytes: CRC32 (big endian) of everything after it
    /// - 1 byte: operation
    /// - varint: payload length
    /// - N bytes: metric payload
    ///
    /// The separator is appended by the log, not here.
    pub fn encode(&self) -> Result<Bytes> {
        if self.op.kind() != self.metric.kind() {
            return Err(TallyError::Encoding(format!(
                "{:?} cannot carry {} metric {}",
                self.op,
                self.metric.kind(),
                self.metric.name()
            )));
        }
        let payload = self.metric.to_bytes()?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + MAX_VARINT_LEN + payload.len());

        // Reserve space for checksum
        buf.put_u32(0);
        buf.put_u8(self.op as u8);
        put_varint(&mut buf, payload.len() as i64);
        buf.put_slice(&payload);

        let checksum = crc32fast::hash(&buf[CHECKSUM_LEN..]);
        buf[..CHECKSUM_LEN].copy_from_slice(&checksum.to_be_bytes());

        Ok(buf.freeze())
    }

    /// Parse exactly one frame, validating length, operation and checksum
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_FRAME_LEN {
            return Err(TallyError::CorruptRecord(format!(
                "record too short: {} bytes",
                data.len()
            )));
        }

        let op = Operation::try_from(data[CHECKSUM_LEN])?;

        let (len, varint_len) = read_varint(&data[HEADER_LEN..]).ok_or_else(|| {
            TallyError::CorruptRecord("malformed payload length".into())
        })?;
        let start = HEADER_LEN + varint_len;
        let available = data.len() - start;
        if len <= 0 || len as u64 > available as u64 {
            return Err(TallyError::CorruptRecord(format!(
                "payload length {len} out of range, {available} bytes available"
            )));
        }
        if len as usize != available {
            return Err(TallyError::CorruptRecord(format!(
                "{} trailing bytes after payload",
                available - len as usize
            )));
        }

        let expected = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let actual = crc32fast::hash(&data[CHECKSUM_LEN..]);
        if expected != actual {
            return Err(TallyError::ChecksumMismatch { expected, actual });
        }

        let metric = Metric::from_bytes(&data[start..])?;
        if metric.kind() != op.kind() {
            return Err(TallyError::CorruptRecord(format!(
                "{op:?} record carries {} metric {}",
                metric.kind(),
                metric.name()
            )));
        }

        Ok(Self { op, metric })
    }
}

/// Append a zig-zag varint
pub(crate) fn put_varint(buf: &mut BytesMut, value: i64) {
    let mut ux = ((value << 1) ^ (value >> 63)) as u64;
    while ux >= 0x80 {
        buf.put_u8(ux as u8 | 0x80);
        ux >>= 7;
    }
    buf.put_u8(ux as u8);
}

/// Read a zig-zag varint, returning the value and bytes consumed.
/// `None` if the input ends early or the value overflows 64 bits.
pub(crate) fn read_varint(data: &[u8]) -> Option<(i64, usize)> {
    let mut ux = 0u64;
    let mut shift = 0u32;
    for (i, &b) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return None;
        }
        if b < 0x80 {
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return None;
            }
            ux |= u64::from(b) << shift;
            let mut x = (ux >> 1) as i64;
            if ux & 1 != 0 {
                x = !x;
            }
            return Some((x, i + 1));
        }
        ux |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    None
}
