//! Binary wire format exchanged with the simulator host across the ABI
//! boundary: the host writes a telemetry frame once per tick, and the
//! bridge writes a command frame back. Both frames are flat sequences of
//! fixed-header records so the host's native code can walk them without a
//! JSON parser in the hot path — JSON only appears once the data reaches a
//! network client.
//!
//! Record layout, repeated until the buffer is exhausted:
//!
//! ```text
//! id: u64 (little-endian, FNV-1a hash of the canonical name)
//! kind: u8
//! payload: kind-dependent, see RecordKind
//! ```

use crate::errors::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    F64 = 0,
    String = 1,
    String8 = 2,
    Vector2 = 3,
    Vector3 = 4,
}

impl RecordKind {
    fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Self::F64),
            1 => Ok(Self::String),
            2 => Ok(Self::String8),
            3 => Ok(Self::Vector2),
            4 => Ok(Self::Vector3),
            other => Err(CodecError::MalformedFrame(format!("unknown record kind tag {other}"))),
        }
    }
}

/// Fixed width of a `String8` record's payload: 8 bytes, NUL-padded UTF-8,
/// for short identifiers that don't justify a length prefix.
const STRING8_WIDTH: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    F64(f64),
    String(String),
    String8(String),
    Vector2([f64; 2]),
    Vector3([f64; 3]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub id: u64,
    pub value: TelemetryValue,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::MalformedFrame(format!(
                "expected {n} more bytes, only {} remain",
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn take_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn take_f64(&mut self) -> Result<f64, CodecError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }
}

/// Decodes a full telemetry frame. Any truncation or unrecognized kind tag
/// is reported as a single `MalformedFrame` error for the whole frame —
/// there is no partial-record recovery, since a frame is produced and
/// consumed atomically within one host tick.
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<TelemetryRecord>, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let mut records = Vec::new();
    while cursor.remaining() > 0 {
        let id = cursor.take_u64()?;
        let kind = RecordKind::from_tag(cursor.take_u8()?)?;
        let value = match kind {
            RecordKind::F64 => TelemetryValue::F64(cursor.take_f64()?),
            RecordKind::String => {
                let len = cursor.take_u16()? as usize;
                let raw = cursor.take(len)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| CodecError::MalformedFrame(format!("invalid utf-8: {e}")))?;
                TelemetryValue::String(s.to_owned())
            }
            RecordKind::String8 => {
                let raw = cursor.take(STRING8_WIDTH)?;
                let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
                let s = std::str::from_utf8(&raw[..end])
                    .map_err(|e| CodecError::MalformedFrame(format!("invalid utf-8: {e}")))?;
                TelemetryValue::String8(s.to_owned())
            }
            RecordKind::Vector2 => {
                TelemetryValue::Vector2([cursor.take_f64()?, cursor.take_f64()?])
            }
            RecordKind::Vector3 => {
                TelemetryValue::Vector3([cursor.take_f64()?, cursor.take_f64()?, cursor.take_f64()?])
            }
        };
        records.push(TelemetryRecord { id, value });
    }
    Ok(records)
}

fn push_record(buf: &mut Vec<u8>, id: u64, kind: RecordKind, write_payload: impl FnOnce(&mut Vec<u8>)) {
    buf.extend_from_slice(&id.to_le_bytes());
    buf.push(kind as u8);
    write_payload(buf);
}

/// Encodes a telemetry frame. Exposed mainly for tests and for the demo
/// host binary, which needs to produce frames in the same shape the real
/// simulator host would.
pub fn encode_frame(records: &[TelemetryRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    for record in records {
        match &record.value {
            TelemetryValue::F64(v) => {
                push_record(&mut buf, record.id, RecordKind::F64, |b| b.extend_from_slice(&v.to_le_bytes()));
            }
            TelemetryValue::String(s) => {
                push_record(&mut buf, record.id, RecordKind::String, |b| {
                    let len = s.len().min(u16::MAX as usize) as u16;
                    b.extend_from_slice(&len.to_le_bytes());
                    b.extend_from_slice(&s.as_bytes()[..len as usize]);
                });
            }
            TelemetryValue::String8(s) => {
                push_record(&mut buf, record.id, RecordKind::String8, |b| {
                    let mut fixed = [0u8; STRING8_WIDTH];
                    let bytes = s.as_bytes();
                    let n = bytes.len().min(STRING8_WIDTH);
                    fixed[..n].copy_from_slice(&bytes[..n]);
                    b.extend_from_slice(&fixed);
                });
            }
            TelemetryValue::Vector2(v) => {
                push_record(&mut buf, record.id, RecordKind::Vector2, |b| {
                    b.extend_from_slice(&v[0].to_le_bytes());
                    b.extend_from_slice(&v[1].to_le_bytes());
                });
            }
            TelemetryValue::Vector3(v) => {
                push_record(&mut buf, record.id, RecordKind::Vector3, |b| {
                    for c in v {
                        b.extend_from_slice(&c.to_le_bytes());
                    }
                });
            }
        }
    }
    buf
}

/// A single outbound command: the id of the target variable and the value
/// to apply. Unlike telemetry, commands are always scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandWireRecord {
    pub id: u64,
    pub value: f64,
}

/// Byte width of one encoded command record: an 8-byte id plus an 8-byte
/// little-endian `f64` value.
const COMMAND_RECORD_SIZE: usize = 16;

/// Result of encoding a bounded command frame: the encoded bytes, how many
/// records made it in, and — if the input didn't fit — how many were
/// dropped off the tail.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOutcome {
    pub bytes: Vec<u8>,
    pub written_count: usize,
    pub truncated: Option<std::num::NonZeroUsize>,
}

/// Encodes the command frame the bridge writes back for the host to pull
/// once per tick: a flat sequence of 16-byte `(id, value)` pairs, never
/// exceeding `max_bytes`. Records beyond the capacity are dropped from the
/// tail rather than encoding a partial record.
pub fn encode_command_frame(commands: &[CommandWireRecord], max_bytes: usize) -> EncodeOutcome {
    let max_records = max_bytes / COMMAND_RECORD_SIZE;
    let written_count = commands.len().min(max_records);
    let mut buf = Vec::with_capacity(written_count * COMMAND_RECORD_SIZE);
    for cmd in &commands[..written_count] {
        buf.extend_from_slice(&cmd.id.to_le_bytes());
        buf.extend_from_slice(&cmd.value.to_le_bytes());
    }
    let dropped = commands.len() - written_count;
    EncodeOutcome { bytes: buf, written_count, truncated: std::num::NonZeroUsize::new(dropped) }
}

pub fn decode_command_frame(bytes: &[u8]) -> Result<Vec<CommandWireRecord>, CodecError> {
    if bytes.len() % 16 != 0 {
        return Err(CodecError::MalformedFrame(format!(
            "command frame length {} is not a multiple of 16",
            bytes.len()
        )));
    }
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() / 16);
    while cursor.remaining() > 0 {
        let id = cursor.take_u64()?;
        let value = cursor.take_f64()?;
        out.push(CommandWireRecord { id, value });
    }
    Ok(out)
}
