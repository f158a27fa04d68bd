use std::borrow::Cow;

use rkyv::util::AlignedVec;

use crate::commands::Command;
use crate::events::ServerEvent;
use crate::opcode::Opcode;

/// Record magic bytes: "NW"
pub const MAGIC: [u8; 2] = [0x4E, 0x57];

/// Maximum record payload size: 64 MB
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// Record header size in bytes: magic(2) + flags(1) + opcode(2) + length(4) = 9
pub const HEADER_SIZE: usize = 9;

/// Payloads larger than this are LZ4-compressed when that actually shrinks them.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 512;

bitflags::bitflags! {
    /// Record flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u8 {
        const COMPRESSED = 0b0000_0001;
        const EVENT      = 0b0000_0010;
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub flags: RecordFlags,
    pub opcode: Opcode,
    pub length: u32,
}

/// A complete framed record borrowed from a receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    pub header: RecordHeader,
    pub payload: &'a [u8],
}

impl RawRecord<'_> {
    /// Total bytes this record occupies on the wire.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a command into a framed record.
pub fn encode_command(cmd: &Command, compression_threshold: usize) -> Result<Vec<u8>, WireError> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(cmd)
        .map_err(|e| WireError::Serialization(e.to_string()))?;
    frame(cmd.opcode(), RecordFlags::empty(), &payload, compression_threshold)
}

/// Encode a server event into a framed record.
pub fn encode_event(event: &ServerEvent, compression_threshold: usize) -> Result<Vec<u8>, WireError> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(event)
        .map_err(|e| WireError::Serialization(e.to_string()))?;
    frame(event.opcode(), RecordFlags::EVENT, &payload, compression_threshold)
}

fn frame(
    opcode: Opcode,
    flags: RecordFlags,
    payload: &[u8],
    compression_threshold: usize,
) -> Result<Vec<u8>, WireError> {
    let (final_payload, compression_flag) = if payload.len() > compression_threshold {
        let compressed = lz4_flex::compress_prepend_size(payload);
        if compressed.len() < payload.len() {
            (Cow::Owned(compressed), RecordFlags::COMPRESSED)
        } else {
            (Cow::Borrowed(payload), RecordFlags::empty())
        }
    } else {
        (Cow::Borrowed(payload), RecordFlags::empty())
    };

    let payload_len = u32::try_from(final_payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_SIZE)
        .ok_or(WireError::RecordTooLarge(final_payload.len()))?;

    let mut record = Vec::with_capacity(HEADER_SIZE + final_payload.len());
    record.extend_from_slice(&MAGIC);
    record.push((flags | compression_flag).bits());
    record.extend_from_slice(&opcode.raw().to_le_bytes());
    record.extend_from_slice(&payload_len.to_le_bytes());
    record.extend_from_slice(&final_payload);
    Ok(record)
}

/// Decode and validate a record header.
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<RecordHeader, WireError> {
    if header[0] != MAGIC[0] || header[1] != MAGIC[1] {
        return Err(WireError::InvalidMagic);
    }

    let flags = RecordFlags::from_bits(header[2]).ok_or(WireError::InvalidFlags(header[2]))?;
    let raw_opcode = u16::from_le_bytes([header[3], header[4]]);
    let opcode = Opcode::from_raw(raw_opcode).ok_or(WireError::UnknownOpcode(raw_opcode))?;
    let length = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);

    if length > MAX_RECORD_SIZE {
        return Err(WireError::RecordTooLarge(length as usize));
    }
    if flags.contains(RecordFlags::EVENT) != opcode.is_event() {
        return Err(WireError::DirectionMismatch(opcode));
    }

    Ok(RecordHeader { flags, opcode, length })
}

/// Splits a buffer of concatenated records. Stops after the first error,
/// since nothing past a bad header can be trusted.
pub struct RecordReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn next_record(&mut self) -> Result<RawRecord<'a>, WireError> {
        let rest = &self.buf[self.offset..];
        let header_bytes: &[u8; HEADER_SIZE] = rest
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(WireError::Truncated {
                needed: HEADER_SIZE,
                available: rest.len(),
            })?;
        let header = decode_header(header_bytes)?;

        let total = HEADER_SIZE + header.length as usize;
        let payload = rest.get(HEADER_SIZE..total).ok_or(WireError::Truncated {
            needed: total,
            available: rest.len(),
        })?;

        self.offset += total;
        Ok(RawRecord { header, payload })
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<RawRecord<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.buf.len() {
            return None;
        }
        let result = self.next_record();
        if result.is_err() {
            self.offset = self.buf.len();
        }
        Some(result)
    }
}

/// Decode a command record, checking the payload against its header.
pub fn decode_command(record: &RawRecord<'_>) -> Result<Command, WireError> {
    if record.header.opcode.is_event() {
        return Err(WireError::DirectionMismatch(record.header.opcode));
    }
    let data = unpack(record)?;
    let cmd = rkyv::from_bytes::<Command, rkyv::rancor::Error>(&data)
        .map_err(|e| WireError::Serialization(e.to_string()))?;
    if cmd.opcode() != record.header.opcode {
        return Err(WireError::OpcodeMismatch {
            header: record.header.opcode,
            payload: cmd.opcode(),
        });
    }
    Ok(cmd)
}

/// Decode an event record, checking the payload against its header.
pub fn decode_event(record: &RawRecord<'_>) -> Result<ServerEvent, WireError> {
    if !record.header.opcode.is_event() {
        return Err(WireError::DirectionMismatch(record.header.opcode));
    }
    let data = unpack(record)?;
    let event = rkyv::from_bytes::<ServerEvent, rkyv::rancor::Error>(&data)
        .map_err(|e| WireError::Serialization(e.to_string()))?;
    if event.opcode() != record.header.opcode {
        return Err(WireError::OpcodeMismatch {
            header: record.header.opcode,
            payload: event.opcode(),
        });
    }
    Ok(event)
}

/// Copy the payload into an aligned buffer, decompressing if flagged.
/// rkyv archives must be read from aligned memory, and payloads sit at
/// arbitrary offsets inside a receive buffer.
fn unpack(record: &RawRecord<'_>) -> Result<AlignedVec<16>, WireError> {
    let mut aligned = AlignedVec::<16>::new();
    if record.header.flags.contains(RecordFlags::COMPRESSED) {
        let prefix: [u8; 4] = record
            .payload
            .get(..4)
            .and_then(|p| p.try_into().ok())
            .ok_or_else(|| WireError::DecompressionError("missing size prefix".to_string()))?;
        let declared = u32::from_le_bytes(prefix);
        if declared > MAX_RECORD_SIZE {
            return Err(WireError::RecordTooLarge(declared as usize));
        }
        let data = lz4_flex::decompress_size_prepended(record.payload)
            .map_err(|e| WireError::DecompressionError(e.to_string()))?;
        aligned.extend_from_slice(&data);
    } else {
        aligned.extend_from_slice(record.payload);
    }
    Ok(aligned)
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("invalid flags: {0:#04x}")]
    InvalidFlags(u8),
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),
    #[error("{0:?} record on the wrong channel direction")]
    DirectionMismatch(Opcode),
    #[error("header says {header:?} but payload is {payload:?}")]
    OpcodeMismatch { header: Opcode, payload: Opcode },
    #[error("record too large: {0} bytes")]
    RecordTooLarge(usize),
    #[error("truncated record: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("decompression error: {0}")]
    DecompressionError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ObjectHandle, ObjectType};

    fn destroy(id: u32) -> Command {
        Command::Destroy {
            object: ObjectHandle::new(ObjectType::Texture, id),
        }
    }

    #[test]
    fn test_command_survives_framing() {
        let cmd = Command::RenderPassBuilderAttachmentSetFormat {
            builder: ObjectHandle::new(ObjectType::RenderPassBuilder, 1),
            attachment: 1,
            format: crate::types::TextureFormat::D32FloatS8Uint,
        };
        let bytes = encode_command(&cmd, DEFAULT_COMPRESSION_THRESHOLD).unwrap();

        let mut reader = RecordReader::new(&bytes);
        let record = reader.next().unwrap().unwrap();
        assert_eq!(record.header.opcode, Opcode::RenderPassBuilderAttachmentSetFormat);
        assert_eq!(record.wire_size(), bytes.len());
        assert_eq!(decode_command(&record).unwrap(), cmd);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_large_shader_source_is_compressed() {
        let cmd = Command::ShaderModuleBuilderSetSource {
            builder: ObjectHandle::new(ObjectType::ShaderModuleBuilder, 3),
            code: vec![0x0723_0203; 4096],
        };
        let bytes = encode_command(&cmd, DEFAULT_COMPRESSION_THRESHOLD).unwrap();
        let header = decode_header(bytes[..HEADER_SIZE].try_into().unwrap()).unwrap();
        assert!(header.flags.contains(RecordFlags::COMPRESSED));
        assert!(bytes.len() < 4096 * 4);

        let record = RecordReader::new(&bytes).next().unwrap().unwrap();
        assert_eq!(decode_command(&record).unwrap(), cmd);
    }

    #[test]
    fn test_reader_splits_concatenated_records() {
        let mut buf = Vec::new();
        for id in 1..=3 {
            buf.extend(encode_command(&destroy(id), DEFAULT_COMPRESSION_THRESHOLD).unwrap());
        }
        let decoded: Vec<Command> = RecordReader::new(&buf)
            .map(|r| decode_command(&r.unwrap()).unwrap())
            .collect();
        assert_eq!(decoded, vec![destroy(1), destroy(2), destroy(3)]);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode_command(&destroy(1), DEFAULT_COMPRESSION_THRESHOLD).unwrap();
        bytes[0] = b'X';
        let mut reader = RecordReader::new(&bytes);
        assert!(matches!(reader.next(), Some(Err(WireError::InvalidMagic))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut bytes = encode_command(&destroy(1), DEFAULT_COMPRESSION_THRESHOLD).unwrap();
        bytes[3..5].copy_from_slice(&0x7777u16.to_le_bytes());
        let result = RecordReader::new(&bytes).next().unwrap();
        assert!(matches!(result, Err(WireError::UnknownOpcode(0x7777))));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let bytes = encode_command(&destroy(1), DEFAULT_COMPRESSION_THRESHOLD).unwrap();
        let result = RecordReader::new(&bytes[..bytes.len() - 1]).next().unwrap();
        assert!(matches!(result, Err(WireError::Truncated { .. })));

        let result = RecordReader::new(&bytes[..4]).next().unwrap();
        assert!(matches!(
            result,
            Err(WireError::Truncated { needed: HEADER_SIZE, available: 4 })
        ));
    }

    #[test]
    fn test_opcode_payload_mismatch_rejected() {
        let mut bytes = encode_command(&destroy(1), DEFAULT_COMPRESSION_THRESHOLD).unwrap();
        bytes[3..5].copy_from_slice(&Opcode::SwapChainPresent.raw().to_le_bytes());
        let record = RecordReader::new(&bytes).next().unwrap().unwrap();
        assert!(matches!(
            decode_command(&record),
            Err(WireError::OpcodeMismatch { header: Opcode::SwapChainPresent, payload: Opcode::Destroy })
        ));
    }

    #[test]
    fn test_event_on_command_channel_rejected() {
        let event = ServerEvent::SessionTerminated {
            reason: "test".to_string(),
        };
        let bytes = encode_event(&event, DEFAULT_COMPRESSION_THRESHOLD).unwrap();
        let record = RecordReader::new(&bytes).next().unwrap().unwrap();
        assert!(matches!(decode_command(&record), Err(WireError::DirectionMismatch(_))));
        assert_eq!(decode_event(&record).unwrap(), event);

        // An event opcode without the EVENT flag fails at the header.
        let mut forged = bytes.clone();
        forged[2] = 0;
        assert!(matches!(
            RecordReader::new(&forged).next().unwrap(),
            Err(WireError::DirectionMismatch(Opcode::SessionTerminated))
        ));
    }

    #[test]
    fn test_opcode_values_are_unique() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_raw(op.raw()), Some(*op));
        }
    }
}
