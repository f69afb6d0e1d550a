//! Intel HEX records: `:LLAAAATT<data>CC`, one per line.

use hex::FromHexError;

use crate::{ImageError, Result};

/// Payload bytes per data record when writing images.
pub const DATA_RECORD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Data,
    EndOfFile,
    ExtendedSegmentAddress,
    StartSegmentAddress,
    ExtendedLinearAddress,
    StartLinearAddress,
}

impl RecordType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(RecordType::Data),
            0x01 => Some(RecordType::EndOfFile),
            0x02 => Some(RecordType::ExtendedSegmentAddress),
            0x03 => Some(RecordType::StartSegmentAddress),
            0x04 => Some(RecordType::ExtendedLinearAddress),
            0x05 => Some(RecordType::StartLinearAddress),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RecordType::Data => 0x00,
            RecordType::EndOfFile => 0x01,
            RecordType::ExtendedSegmentAddress => 0x02,
            RecordType::StartSegmentAddress => 0x03,
            RecordType::ExtendedLinearAddress => 0x04,
            RecordType::StartLinearAddress => 0x05,
        }
    }

    fn expected_len(self) -> Option<usize> {
        match self {
            RecordType::Data => None,
            RecordType::EndOfFile => Some(0),
            RecordType::ExtendedSegmentAddress | RecordType::ExtendedLinearAddress => Some(2),
            RecordType::StartSegmentAddress | RecordType::StartLinearAddress => Some(4),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub offset: u16,
    pub data: Vec<u8>,
}

impl Record {
    pub fn data(offset: u16, data: &[u8]) -> Self {
        Self {
            record_type: RecordType::Data,
            offset,
            data: data.to_vec(),
        }
    }

    pub fn end_of_file() -> Self {
        Self {
            record_type: RecordType::EndOfFile,
            offset: 0,
            data: Vec::new(),
        }
    }

    pub fn extended_linear_address(upper: u16) -> Self {
        Self {
            record_type: RecordType::ExtendedLinearAddress,
            offset: 0,
            data: upper.to_be_bytes().to_vec(),
        }
    }

    /// Address base set by an extended address record, if this is one.
    pub fn address_base(&self) -> Option<u32> {
        let value = match self.data.as_slice() {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            _ => return None,
        };
        match self.record_type {
            RecordType::ExtendedLinearAddress => Some(value << 16),
            RecordType::ExtendedSegmentAddress => Some(value << 4),
            _ => None,
        }
    }

    pub fn checksum(&self) -> u8 {
        let [hi, lo] = self.offset.to_be_bytes();
        let sum = self
            .data
            .iter()
            .fold(
                (self.data.len() as u8)
                    .wrapping_add(hi)
                    .wrapping_add(lo)
                    .wrapping_add(self.record_type.as_u8()),
                |acc, b| acc.wrapping_add(*b),
            );
        sum.wrapping_neg()
    }

    pub fn to_line(&self) -> String {
        let [hi, lo] = self.offset.to_be_bytes();
        let mut bytes = Vec::with_capacity(self.data.len() + 5);
        bytes.extend_from_slice(&[self.data.len() as u8, hi, lo, self.record_type.as_u8()]);
        bytes.extend_from_slice(&self.data);
        bytes.push(self.checksum());
        format!(":{}", hex::encode_upper(bytes))
    }

    /// Parses one trimmed record line. `line_number` is 1-based and only used
    /// for error reporting.
    pub fn parse(text: &str, line_number: usize) -> Result<Self> {
        let malformed = |reason: &str| ImageError::MalformedImage {
            line: line_number,
            reason: reason.to_string(),
        };

        let digits = text
            .strip_prefix(':')
            .ok_or_else(|| malformed("record does not start with ':'"))?;
        let bytes = hex::decode(digits).map_err(|e| match e {
            FromHexError::OddLength => malformed("record has an odd number of hex digits"),
            _ => malformed("record contains non-hex characters"),
        })?;

        if bytes.len() < 5 {
            return Err(malformed("record is too short"));
        }
        let data_len = bytes[0] as usize;
        if bytes.len() != data_len + 5 {
            return Err(malformed("record length does not match its byte count"));
        }

        let record_type = RecordType::from_u8(bytes[3])
            .ok_or_else(|| malformed(&format!("unknown record type {:02X}", bytes[3])))?;
        if let Some(expected) = record_type.expected_len() {
            if data_len != expected {
                return Err(malformed("unexpected payload length for record type"));
            }
        }

        let record = Self {
            record_type,
            offset: u16::from_be_bytes([bytes[1], bytes[2]]),
            data: bytes[4..4 + data_len].to_vec(),
        };
        if record.checksum() != bytes[4 + data_len] {
            return Err(malformed("checksum mismatch"));
        }
        Ok(record)
    }
}

/// Data records covering `bytes` placed at `start`, with extended linear
/// address records whenever the upper 16 address bits change. `start` must be
/// 16 byte aligned so no record straddles a 64 KiB boundary.
pub fn data_records(start: u32, bytes: &[u8]) -> Vec<Record> {
    let mut records = Vec::with_capacity(bytes.len() / DATA_RECORD_LEN + 2);
    let mut upper = None;

    for (i, chunk) in bytes.chunks(DATA_RECORD_LEN).enumerate() {
        let address = start + (i * DATA_RECORD_LEN) as u32;
        let high = (address >> 16) as u16;
        if upper != Some(high) {
            records.push(Record::extended_linear_address(high));
            upper = Some(high);
        }
        records.push(Record::data((address & 0xFFFF) as u16, chunk));
    }
    records
}
