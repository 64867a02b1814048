//! Record header & field-descriptor schema (C2).
//!
//! Byte layout mirrors the fixed-offset struct parsing style used throughout
//! this corpus (a `from_bytes` constructor over a raw slice, validating
//! invariants immediately rather than deferring to first use).

use std::fmt::Display;

use crate::bytes;
use crate::error::{Error, Result};
use crate::field::FieldType;

pub const HEADER_SIZE: usize = 32;
pub const FIELD_DESCRIPTOR_SIZE: usize = 32;
pub const TERMINATOR: u8 = 0x0D;

pub const VERSION_FOXBASE: u8 = 0x03;
pub const VERSION_WITH_MEMO: u8 = 0x83;

/// The 32-byte file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfHeader {
    pub version: u8,
    pub last_update: (u8, u8, u8), // (year-1900, month, day)
    pub record_count: u32,
    pub header_length: u16,
    pub record_length: u16,
    pub transaction_flag: u8,
    pub encryption_flag: u8,
    pub has_index: bool,
    pub language_driver: u8,
}

impl DbfHeader {
    pub fn from_bytes(buf: &[u8]) -> Result<DbfHeader> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::InvalidHeader("header shorter than 32 bytes".into()));
        }

        let version = buf[0];
        let last_update = (buf[1], buf[2], buf[3]);
        let record_count = bytes::read_u32(&buf[4..8]);
        let header_length = bytes::read_u16(&buf[8..10]);
        let record_length = bytes::read_u16(&buf[10..12]);
        let transaction_flag = buf[14];
        let encryption_flag = buf[15];
        let has_index = buf[28] != 0;
        let language_driver = buf[29];

        if header_length < HEADER_SIZE as u16 + 1 {
            return Err(Error::InvalidHeader(format!(
                "header_length {header_length} too small"
            )));
        }
        if (header_length as usize - HEADER_SIZE - 1) % FIELD_DESCRIPTOR_SIZE != 0 {
            return Err(Error::InvalidHeader(format!(
                "header_length {header_length} is not 32 + 32*N + 1"
            )));
        }

        Ok(DbfHeader {
            version,
            last_update,
            record_count,
            header_length,
            record_length,
            transaction_flag,
            encryption_flag,
            has_index,
            language_driver,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.version;
        out[1] = self.last_update.0;
        out[2] = self.last_update.1;
        out[3] = self.last_update.2;
        bytes::write_u32(&mut out[4..8], self.record_count);
        bytes::write_u16(&mut out[8..10], self.header_length);
        bytes::write_u16(&mut out[10..12], self.record_length);
        out[14] = self.transaction_flag;
        out[15] = self.encryption_flag;
        out[28] = self.has_index as u8;
        out[29] = self.language_driver;
        out
    }

    pub fn field_count(&self) -> usize {
        (self.header_length as usize - HEADER_SIZE - 1) / FIELD_DESCRIPTOR_SIZE
    }

    pub fn has_memo(&self) -> bool {
        self.version == VERSION_WITH_MEMO
    }

    /// Whether a future `open` should treat this file as left mid-transaction
    /// by a process that crashed before clearing the flag.
    pub fn needs_recovery(&self) -> bool {
        self.transaction_flag != 0
    }
}

impl Display for DbfHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DbfHeader(version={:#04x}, records={}, record_length={}, fields={})",
            self.version,
            self.record_count,
            self.record_length,
            self.field_count(),
        )
    }
}

/// One 32-byte field descriptor entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub length: u8,
    pub decimals: u8,
}

impl FieldDescriptor {
    pub fn from_bytes(buf: &[u8]) -> Result<FieldDescriptor> {
        if buf.len() < FIELD_DESCRIPTOR_SIZE {
            return Err(Error::InvalidFieldDescriptor(
                "descriptor shorter than 32 bytes".into(),
            ));
        }

        let name_bytes = &buf[0..11];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(11);
        let name = String::from_utf8_lossy(&name_bytes[..name_len])
            .trim()
            .to_ascii_uppercase();
        if name.is_empty() {
            return Err(Error::InvalidFieldDescriptor("empty field name".into()));
        }

        let field_type = FieldType::from_byte(buf[11])
            .map_err(|_| Error::InvalidFieldDescriptor(format!("unknown type byte {:#04x}", buf[11])))?;
        let length = buf[16];
        let decimals = buf[17];

        validate_length(field_type, length, &name)?;

        Ok(FieldDescriptor {
            name,
            field_type,
            length,
            decimals,
        })
    }

    pub fn to_bytes(&self) -> [u8; FIELD_DESCRIPTOR_SIZE] {
        let mut out = [0u8; FIELD_DESCRIPTOR_SIZE];
        let name_bytes = self.name.as_bytes();
        let n = name_bytes.len().min(10);
        out[..n].copy_from_slice(&name_bytes[..n]);
        out[11] = self.field_type.to_byte();
        out[16] = self.length;
        out[17] = self.decimals;
        out
    }
}

/// Check that `length` is within the range the field type's codec (§4.1)
/// actually honors. `C`/`N`/`F`/`M` are variable-width; `D`/`L`/`I`/`T` are
/// fixed-width wire types whose `encode`/`decode` ignore `length` entirely,
/// so a mismatched descriptor would silently produce the wrong record size.
fn validate_length(field_type: FieldType, length: u8, name: &str) -> Result<()> {
    if length == 0 {
        return Err(Error::InvalidFieldDescriptor(format!(
            "field {name} has zero length"
        )));
    }
    let ok = match field_type {
        FieldType::Character | FieldType::Numeric | FieldType::Float | FieldType::Memo => true,
        FieldType::Date => length == 8,
        FieldType::Logical => length == 1,
        FieldType::Integer => length == 4,
        FieldType::DateTime => length == 8,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidFieldDescriptor(format!(
            "field {name} of type {field_type:?} has length {length}, which its codec cannot honor"
        )))
    }
}

/// Build a header + descriptor set from a field list, computing
/// `header_length`/`record_length` per the layout invariants.
pub fn build_header(fields: &[FieldDescriptor], version: u8) -> Result<DbfHeader> {
    for f in fields {
        validate_length(f.field_type, f.length, &f.name)?;
    }

    let header_length = HEADER_SIZE as u16 + (fields.len() as u16) * FIELD_DESCRIPTOR_SIZE as u16 + 1;
    let record_length: u16 = 1 + fields.iter().map(|f| f.length as u16).sum::<u16>();

    Ok(DbfHeader {
        version,
        last_update: (0, 1, 1),
        record_count: 0,
        header_length,
        record_length,
        transaction_flag: 0,
        encryption_flag: 0,
        has_index: false,
        language_driver: 0,
    })
}
