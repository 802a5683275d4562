use thiserror::Error;

/// Structural problems found while decoding DBF bytes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("header too short: expected at least {expected} bytes, got {actual}")]
    HeaderTooShort { expected: usize, actual: usize },

    #[error("field table terminator (0x0D) not found within {window} bytes")]
    MissingTerminator { window: usize },

    #[error("invalid {what}: {value}")]
    InvalidLength { what: &'static str, value: usize },

    #[error("invalid field descriptor #{index}: {reason}")]
    InvalidFieldDescriptor { index: usize, reason: String },

    #[error("field lengths add up to {fields_total} (+1 deletion flag) but record length is {record_length}")]
    FieldLayoutMismatch {
        fields_total: usize,
        record_length: usize,
    },

    #[error("file is {actual} bytes but header declares at least {expected}")]
    TruncatedFile { expected: u64, actual: u64 },

    #[error("record {record} is truncated: expected {expected} bytes, got {actual}")]
    TruncatedRecord {
        record: usize,
        expected: usize,
        actual: usize,
    },

    #[error("record {record} has invalid deletion flag 0x{flag:02X}")]
    InvalidDeletionFlag { record: usize, flag: u8 },

    #[error("record {record}, field {field}: cannot parse {raw:?} as {expected}")]
    MalformedValue {
        record: usize,
        field: String,
        expected: &'static str,
        raw: String,
    },
}

/// Centralized error type for the dbf_core crate
#[derive(Error, Debug)]
pub enum DbfError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(#[from] FormatError),
}

impl DbfError {
    pub fn is_format(&self) -> bool {
        matches!(self, DbfError::Format(_))
    }

    pub fn as_format(&self) -> Option<&FormatError> {
        match self {
            DbfError::Format(e) => Some(e),
            DbfError::Io(_) => None,
        }
    }
}

/// Alias for fallible operations in the dbf_core crate
pub type DbfResult<T> = Result<T, DbfError>;
