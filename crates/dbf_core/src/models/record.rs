//! Fixed-length record decoding
//!
//! Each record is one deletion-flag byte followed by the fields laid out in
//! header order. Text-encoded types (C, N, F, D, L, M) are parsed from ASCII;
//! the FoxPro binary types (I, O, Y, T) are little-endian.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::errors::FormatError;
use crate::models::header::{FieldDescriptor, FieldType, FileHeader};
use crate::models::text::{decode_character, is_blank, trim_padding};

/// Deletion flag of a live record
pub const ACTIVE_FLAG: u8 = b' ';
/// Deletion flag of a soft-deleted record
pub const DELETED_FLAG: u8 = b'*';

/// Julian day number of 0001-01-01 minus one, used to map FoxPro DateTime days
const JULIAN_DAY_CE_OFFSET: i32 = 1_721_425;
/// FoxPro stores currency as an integer scaled by 10^4
const CURRENCY_SCALE: f64 = 10_000.0;

/// What to do with records whose deletion flag is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedPolicy {
    /// Decode deleted records and emit them with `deleted = true`
    #[default]
    Surface,
    /// Do not decode or emit deleted records
    Skip,
}

/// A decoded field value. `None` payloads are blank fields.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Character(String),
    Integer(Option<i64>),
    Real(Option<f64>),
    Date(Option<NaiveDate>),
    DateTime(Option<NaiveDateTime>),
    Logical(Option<bool>),
    /// Block number in the companion memo file
    Memo(Option<u32>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            FieldValue::Integer(None)
                | FieldValue::Real(None)
                | FieldValue::Date(None)
                | FieldValue::DateTime(None)
                | FieldValue::Logical(None)
                | FieldValue::Memo(None)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Character(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => *v,
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Real(v) => *v,
            FieldValue::Integer(v) => v.map(|i| i as f64),
            _ => None,
        }
    }

    /// The null value for a field of the given descriptor
    fn null_for(field: &FieldDescriptor) -> Self {
        match field.field_type {
            FieldType::Numeric | FieldType::Float if field.is_integral() => FieldValue::Integer(None),
            FieldType::Numeric | FieldType::Float | FieldType::Double | FieldType::Currency => {
                FieldValue::Real(None)
            }
            FieldType::Integer => FieldValue::Integer(None),
            FieldType::Date => FieldValue::Date(None),
            FieldType::DateTime => FieldValue::DateTime(None),
            FieldType::Logical => FieldValue::Logical(None),
            FieldType::Memo => FieldValue::Memo(None),
            FieldType::Character | FieldType::Unknown(_) => FieldValue::Character(String::new()),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Character(s) => serializer.serialize_str(s),
            FieldValue::Integer(Some(v)) => serializer.serialize_i64(*v),
            FieldValue::Real(Some(v)) => serializer.serialize_f64(*v),
            FieldValue::Date(Some(d)) => serializer.collect_str(&d.format("%Y-%m-%d")),
            FieldValue::DateTime(Some(dt)) => {
                serializer.collect_str(&dt.format("%Y-%m-%dT%H:%M:%S%.3f"))
            }
            FieldValue::Logical(Some(b)) => serializer.serialize_bool(*b),
            FieldValue::Memo(Some(block)) => serializer.serialize_u32(*block),
            _ => serializer.serialize_none(),
        }
    }
}

/// One decoded record, field values in header order
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub index: usize,
    pub deleted: bool,
    pub values: Vec<(String, FieldValue)>,
}

impl Record {
    /// Case-insensitive lookup by field name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Decodes raw records against a fixed header layout
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    header: Arc<FileHeader>,
    lenient: bool,
}

impl RecordDecoder {
    pub fn new(header: Arc<FileHeader>) -> Self {
        Self {
            header,
            lenient: false,
        }
    }

    /// Substitute null for malformed non-blank values instead of failing
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn record_length(&self) -> usize {
        self.header.record_length as usize
    }

    /// Check the deletion flag; anything but ' ' or '*' means the stride is off
    pub fn is_deleted(&self, index: usize, bytes: &[u8]) -> Result<bool, FormatError> {
        match bytes.first() {
            Some(&ACTIVE_FLAG) => Ok(false),
            Some(&DELETED_FLAG) => Ok(true),
            Some(&flag) => Err(FormatError::InvalidDeletionFlag { record: index, flag }),
            None => Err(FormatError::TruncatedRecord {
                record: index,
                expected: self.record_length(),
                actual: 0,
            }),
        }
    }

    /// Decode one record from exactly `record_length` bytes
    pub fn decode(&self, index: usize, bytes: &[u8]) -> Result<Record, FormatError> {
        if bytes.len() != self.record_length() {
            return Err(FormatError::TruncatedRecord {
                record: index,
                expected: self.record_length(),
                actual: bytes.len(),
            });
        }
        let deleted = self.is_deleted(index, bytes)?;

        let mut values = Vec::with_capacity(self.header.fields.len());
        for field in &self.header.fields {
            let raw = &bytes[field.range()];
            let value = match decode_field(field, raw) {
                Ok(value) => value,
                Err(expected) => {
                    let err = FormatError::MalformedValue {
                        record: index,
                        field: field.name.clone(),
                        expected,
                        raw: String::from_utf8_lossy(raw).into_owned(),
                    };
                    if !self.lenient {
                        return Err(err);
                    }
                    log::warn!("{err}; substituting null");
                    FieldValue::null_for(field)
                }
            };
            values.push((field.name.clone(), value));
        }

        log::trace!("Decoded record {} ({} fields)", index, values.len());
        Ok(Record {
            index,
            deleted,
            values,
        })
    }
}

/// Decode a single field. The error names what the bytes should have been.
pub fn decode_field(field: &FieldDescriptor, raw: &[u8]) -> Result<FieldValue, &'static str> {
    if field.field_type.fixed_width().is_some_and(|width| width != raw.len()) {
        return Err("fixed-width value");
    }
    match field.field_type {
        FieldType::Character | FieldType::Unknown(_) => Ok(FieldValue::Character(decode_character(raw))),
        FieldType::Numeric | FieldType::Float => {
            if field.is_integral() {
                parse_integer(raw).map(FieldValue::Integer)
            } else {
                parse_real(raw).map(FieldValue::Real)
            }
        }
        FieldType::Date => parse_date(raw).map(FieldValue::Date),
        FieldType::Logical => parse_logical(raw).map(FieldValue::Logical),
        FieldType::Memo => parse_memo(raw).map(FieldValue::Memo),
        FieldType::Integer => Ok(FieldValue::Integer(Some(LittleEndian::read_i32(raw) as i64))),
        FieldType::Double => Ok(FieldValue::Real(Some(LittleEndian::read_f64(raw)))),
        FieldType::Currency => Ok(FieldValue::Real(Some(
            LittleEndian::read_i64(raw) as f64 / CURRENCY_SCALE,
        ))),
        FieldType::DateTime => parse_datetime(raw).map(FieldValue::DateTime),
    }
}

/// Split `[sign] digits [. digits]` into its parts, rejecting anything else
fn split_decimal(text: &[u8]) -> Option<(bool, &[u8], &[u8])> {
    let (negative, rest) = match text.first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (int_part, frac_part) = match rest.iter().position(|&b| b == b'.') {
        Some(dot) => (&rest[..dot], &rest[dot + 1..]),
        None => (rest, &rest[rest.len()..]),
    };
    let all_digits = |s: &[u8]| s.iter().all(u8::is_ascii_digit);
    if !all_digits(int_part) || !all_digits(frac_part) || (int_part.is_empty() && frac_part.is_empty()) {
        return None;
    }
    Some((negative, int_part, frac_part))
}

fn parse_integer(raw: &[u8]) -> Result<Option<i64>, &'static str> {
    const EXPECTED: &str = "integer";
    let text = trim_padding(raw);
    if text.is_empty() {
        return Ok(None);
    }
    if text.iter().any(|&b| b == b'e' || b == b'E') {
        return parse_exponent_integer(raw).ok_or(EXPECTED);
    }
    let (negative, int_part, frac_part) = split_decimal(text).ok_or(EXPECTED)?;
    if frac_part.iter().any(|&b| b != b'0') {
        return Err(EXPECTED);
    }
    let mut value: i64 = 0;
    for &digit in int_part {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((digit - b'0') as i64))
            .ok_or(EXPECTED)?;
    }
    Ok(Some(if negative { -value } else { value }))
}

/// Float fields are often written in exponent form even when integral
fn parse_exponent_integer(raw: &[u8]) -> Option<Option<i64>> {
    let value = parse_real(raw).ok()??;
    let in_range = (i64::MIN as f64..i64::MAX as f64).contains(&value);
    (value.fract() == 0.0 && in_range).then_some(Some(value as i64))
}

fn parse_real(raw: &[u8]) -> Result<Option<f64>, &'static str> {
    const EXPECTED: &str = "number";
    let text = trim_padding(raw);
    if text.is_empty() {
        return Ok(None);
    }
    // Float fields may carry an exponent; the mantissa follows the decimal grammar
    let (mantissa, exponent) = match text.iter().position(|&b| b == b'e' || b == b'E') {
        Some(pos) => (&text[..pos], Some(&text[pos + 1..])),
        None => (text, None),
    };
    split_decimal(mantissa).ok_or(EXPECTED)?;
    if let Some(exp) = exponent {
        let digits = match exp.first() {
            Some(b'-') | Some(b'+') => &exp[1..],
            _ => exp,
        };
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(EXPECTED);
        }
    }
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .map(Some)
        .ok_or(EXPECTED)
}

fn parse_date(raw: &[u8]) -> Result<Option<NaiveDate>, &'static str> {
    const EXPECTED: &str = "date (YYYYMMDD)";
    let text = trim_padding(raw);
    if text.is_empty() || text.iter().all(|&b| b == b'0') {
        return Ok(None);
    }
    if text.len() != 8 || !text.iter().all(u8::is_ascii_digit) {
        return Err(EXPECTED);
    }
    let number = |range: std::ops::Range<usize>| {
        text[range]
            .iter()
            .fold(0u32, |acc, &b| acc * 10 + (b - b'0') as u32)
    };
    NaiveDate::from_ymd_opt(number(0..4) as i32, number(4..6), number(6..8))
        .map(Some)
        .ok_or(EXPECTED)
}

fn parse_logical(raw: &[u8]) -> Result<Option<bool>, &'static str> {
    match raw.first() {
        Some(b'T' | b't' | b'Y' | b'y') => Ok(Some(true)),
        Some(b'F' | b'f' | b'N' | b'n') => Ok(Some(false)),
        Some(b'?' | b' ' | 0x00) | None => Ok(None),
        Some(_) => Err("logical (T/F/Y/N/?)"),
    }
}

fn parse_memo(raw: &[u8]) -> Result<Option<u32>, &'static str> {
    const EXPECTED: &str = "memo block number";
    // Visual FoxPro stores the block as a 4-byte integer, dBASE as 10 ASCII digits
    if raw.len() == 4 {
        let block = LittleEndian::read_u32(raw);
        return Ok((block != 0).then_some(block));
    }
    if is_blank(raw) {
        return Ok(None);
    }
    let text = trim_padding(raw);
    if !text.iter().all(u8::is_ascii_digit) {
        return Err(EXPECTED);
    }
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .map(|block| (block != 0).then_some(block))
        .ok_or(EXPECTED)
}

fn parse_datetime(raw: &[u8]) -> Result<Option<NaiveDateTime>, &'static str> {
    const EXPECTED: &str = "datetime (julian day + milliseconds)";
    let day = LittleEndian::read_i32(&raw[0..4]);
    let millis = LittleEndian::read_i32(&raw[4..8]);
    if day == 0 {
        return Ok(None);
    }
    let date = day
        .checked_sub(JULIAN_DAY_CE_OFFSET)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or(EXPECTED)?;
    if millis < 0 {
        return Err(EXPECTED);
    }
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        (millis / 1000) as u32,
        (millis % 1000) as u32 * 1_000_000,
    )
    .ok_or(EXPECTED)?;
    Ok(Some(date.and_time(time)))
}
