//! DBF file header and field-descriptor table
//!
//! A DBF file starts with a 32-byte prefix followed by one 32-byte descriptor
//! per field and a single 0x0D terminator. Record data begins at the header
//! length declared in the prefix.

use std::fmt;
use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::errors::{DbfResult, FormatError};
use crate::models::text::decode_from_iso_8859_1_lossy;

/// Size of the fixed prefix before the field table
pub const FILE_HEADER_SIZE: usize = 32;
/// Size of one field descriptor entry
pub const FIELD_DESCRIPTOR_SIZE: usize = 32;
/// Byte closing the field-descriptor table
pub const FIELD_TERMINATOR: u8 = 0x0D;
/// Smallest valid header: prefix plus terminator
pub const MIN_HEADER_LENGTH: usize = FILE_HEADER_SIZE + 1;
/// Width of the null-padded name slot in a descriptor
pub const FIELD_NAME_SIZE: usize = 11;

/// dBASE years in the header are stored as an offset from 1900
const HEADER_BASE_YEAR: i32 = 1900;

/// Field types found in dBASE-family files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Character,
    Numeric,
    Float,
    Date,
    Logical,
    Memo,
    Integer,
    Double,
    Currency,
    DateTime,
    Unknown(char),
}

impl FieldType {
    pub fn from_code(code: u8) -> Self {
        match code.to_ascii_uppercase() {
            b'C' => FieldType::Character,
            b'N' => FieldType::Numeric,
            b'F' => FieldType::Float,
            b'D' => FieldType::Date,
            b'L' => FieldType::Logical,
            b'M' => FieldType::Memo,
            b'I' => FieldType::Integer,
            b'O' | b'B' => FieldType::Double,
            b'Y' => FieldType::Currency,
            b'T' => FieldType::DateTime,
            other => FieldType::Unknown(other as char),
        }
    }

    /// Resolve a descriptor's type code, which for `B` depends on the width:
    /// 8 bytes is a Visual FoxPro double, anything else a dBASE memo block
    pub fn from_descriptor(code: u8, length: u8) -> Self {
        match Self::from_code(code) {
            FieldType::Double if code.eq_ignore_ascii_case(&b'B') && length != 8 => FieldType::Memo,
            field_type => field_type,
        }
    }

    /// The single-character type code as written on disk
    pub fn code(&self) -> char {
        match self {
            FieldType::Character => 'C',
            FieldType::Numeric => 'N',
            FieldType::Float => 'F',
            FieldType::Date => 'D',
            FieldType::Logical => 'L',
            FieldType::Memo => 'M',
            FieldType::Integer => 'I',
            FieldType::Double => 'O',
            FieldType::Currency => 'Y',
            FieldType::DateTime => 'T',
            FieldType::Unknown(c) => *c,
        }
    }

    /// Byte width for types whose on-disk size is fixed
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            FieldType::Date | FieldType::Double | FieldType::Currency | FieldType::DateTime => {
                Some(8)
            }
            FieldType::Integer => Some(4),
            FieldType::Logical => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Character => write!(f, "Character"),
            FieldType::Numeric => write!(f, "Numeric"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Date => write!(f, "Date"),
            FieldType::Logical => write!(f, "Logical"),
            FieldType::Memo => write!(f, "Memo"),
            FieldType::Integer => write!(f, "Integer"),
            FieldType::Double => write!(f, "Double"),
            FieldType::Currency => write!(f, "Currency"),
            FieldType::DateTime => write!(f, "DateTime"),
            FieldType::Unknown(c) => write!(f, "Unknown({c})"),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_char(self.code())
    }
}

/// One column of the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub length: u8,
    pub decimal_places: u8,
    /// Byte offset inside a record; the deletion flag occupies offset 0
    #[serde(skip)]
    pub offset: usize,
}

impl FieldDescriptor {
    pub fn new<S: Into<String>>(name: S, field_type: FieldType, length: u8, decimal_places: u8) -> Self {
        Self {
            name: name.into(),
            field_type,
            length,
            decimal_places,
            offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Byte range of this field inside a raw record
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len()
    }

    /// Numeric and Float fields without decimals decode to integers
    pub fn is_integral(&self) -> bool {
        self.decimal_places == 0
    }

    fn decode(index: usize, entry: &[u8], offset: usize) -> Result<Self, FormatError> {
        let raw_name = &entry[..FIELD_NAME_SIZE];
        let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(FIELD_NAME_SIZE);
        let name = decode_from_iso_8859_1_lossy(&raw_name[..name_end])
            .trim_end()
            .to_string();
        if name.is_empty() {
            return Err(FormatError::InvalidFieldDescriptor {
                index,
                reason: "empty field name".to_string(),
            });
        }

        let length = entry[16];
        let field_type = FieldType::from_descriptor(entry[11], length);
        let decimal_places = entry[17];
        if length == 0 {
            return Err(FormatError::InvalidFieldDescriptor {
                index,
                reason: format!("field {name} has zero length"),
            });
        }
        if let Some(width) = field_type.fixed_width() {
            if length as usize != width {
                return Err(FormatError::InvalidFieldDescriptor {
                    index,
                    reason: format!("{field_type} field {name} must be {width} bytes, got {length}"),
                });
            }
        }

        Ok(Self {
            name,
            field_type,
            length,
            decimal_places,
            offset,
        })
    }
}

/// Decoded file header, immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHeader {
    pub version: u8,
    pub last_updated: Option<NaiveDate>,
    pub number_of_records: u32,
    pub header_length: u16,
    pub record_length: u16,
    pub fields: Vec<FieldDescriptor>,
}

impl FileHeader {
    /// Total bytes of record data declared by the header
    pub fn data_len(&self) -> u64 {
        self.number_of_records as u64 * self.record_length as u64
    }

    /// Minimum size a file with this header must have
    pub fn expected_file_size(&self) -> u64 {
        self.header_length as u64 + self.data_len()
    }

    pub fn validate_file_size(&self, actual: u64) -> Result<(), FormatError> {
        let expected = self.expected_file_size();
        if actual < expected {
            return Err(FormatError::TruncatedFile { expected, actual });
        }
        Ok(())
    }

    /// Case-insensitive field lookup
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Whether the version byte announces a companion memo file
    pub fn has_memo_file(&self) -> bool {
        matches!(self.version, 0x83 | 0x8B | 0x8E | 0xCB | 0xF5 | 0xFB)
            || (self.version == 0x30 && self.fields.iter().any(|f| f.field_type == FieldType::Memo))
    }

    pub fn version_name(&self) -> &'static str {
        match self.version {
            0x02 => "FoxBASE",
            0x03 => "dBASE III",
            0x04 => "dBASE IV",
            0x05 => "dBASE V",
            0x30 | 0x31 | 0x32 => "Visual FoxPro",
            0x83 => "dBASE III with memo",
            0x8B => "dBASE IV with memo",
            0xF5 => "FoxPro with memo",
            _ => "unknown",
        }
    }
}

/// Decode a header from a buffer holding at least `header_length` bytes
pub fn decode_header(bytes: &[u8]) -> Result<FileHeader, FormatError> {
    if bytes.len() < FILE_HEADER_SIZE {
        return Err(FormatError::HeaderTooShort {
            expected: MIN_HEADER_LENGTH,
            actual: bytes.len(),
        });
    }

    let version = bytes[0];
    let last_updated = NaiveDate::from_ymd_opt(
        HEADER_BASE_YEAR + bytes[1] as i32,
        bytes[2] as u32,
        bytes[3] as u32,
    );
    let number_of_records = LittleEndian::read_u32(&bytes[4..8]);
    let header_length = LittleEndian::read_u16(&bytes[8..10]);
    let record_length = LittleEndian::read_u16(&bytes[10..12]);

    if (header_length as usize) < MIN_HEADER_LENGTH {
        return Err(FormatError::InvalidLength {
            what: "header length",
            value: header_length as usize,
        });
    }
    if record_length == 0 {
        return Err(FormatError::InvalidLength {
            what: "record length",
            value: 0,
        });
    }
    if bytes.len() < header_length as usize {
        return Err(FormatError::HeaderTooShort {
            expected: header_length as usize,
            actual: bytes.len(),
        });
    }

    let window = header_length as usize;
    let mut fields = Vec::new();
    let mut pos = FILE_HEADER_SIZE;
    let mut record_offset = 1;
    loop {
        if pos >= window {
            return Err(FormatError::MissingTerminator { window });
        }
        if bytes[pos] == FIELD_TERMINATOR {
            break;
        }
        if pos + FIELD_DESCRIPTOR_SIZE > window {
            return Err(FormatError::MissingTerminator { window });
        }
        let field = FieldDescriptor::decode(
            fields.len(),
            &bytes[pos..pos + FIELD_DESCRIPTOR_SIZE],
            record_offset,
        )?;
        record_offset += field.len();
        fields.push(field);
        pos += FIELD_DESCRIPTOR_SIZE;
    }

    if fields.is_empty() {
        return Err(FormatError::InvalidLength {
            what: "field count",
            value: 0,
        });
    }
    let fields_total: usize = fields.iter().map(FieldDescriptor::len).sum();
    if fields_total + 1 != record_length as usize {
        return Err(FormatError::FieldLayoutMismatch {
            fields_total,
            record_length: record_length as usize,
        });
    }

    log::debug!(
        "Decoded DBF header: version 0x{:02X}, {} records of {} bytes, {} fields",
        version,
        number_of_records,
        record_length,
        fields.len()
    );

    Ok(FileHeader {
        version,
        last_updated,
        number_of_records,
        header_length,
        record_length,
        fields,
    })
}

/// Read as many bytes as available into `buf`, stopping early only at EOF
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read exactly `header_length` bytes from a source positioned at offset 0
/// and decode them. The reader is left at the first record.
pub fn read_header<R: Read>(reader: &mut R) -> DbfResult<FileHeader> {
    let mut prefix = [0u8; FILE_HEADER_SIZE];
    let n = read_full(reader, &mut prefix)?;
    if n < FILE_HEADER_SIZE {
        return Err(FormatError::HeaderTooShort {
            expected: MIN_HEADER_LENGTH,
            actual: n,
        }
        .into());
    }

    let header_length = LittleEndian::read_u16(&prefix[8..10]) as usize;
    if header_length < MIN_HEADER_LENGTH {
        return Ok(decode_header(&prefix)?);
    }

    let mut buf = vec![0u8; header_length];
    buf[..FILE_HEADER_SIZE].copy_from_slice(&prefix);
    let n = read_full(reader, &mut buf[FILE_HEADER_SIZE..])?;
    buf.truncate(FILE_HEADER_SIZE + n);

    Ok(decode_header(&buf)?)
}
