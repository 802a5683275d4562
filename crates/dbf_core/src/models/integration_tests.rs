//! End-to-end tests over synthetic DBF files written to disk

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use tempfile::NamedTempFile;

use crate::errors::{DbfError, FormatError};
use crate::models::header::{FileHeader, FIELD_TERMINATOR};
use crate::models::record::{FieldValue, Record};
use crate::models::session::{
    count_dbf_records, read_dbf_header, read_dbf_records, ParseEvent, ReadConfig, Session,
};
use crate::models::stream::spawn_file_session;

/// (name, type code, length, decimal places)
type FieldSpec = (&'static str, u8, u8, u8);

fn build_dbf(fields: &[FieldSpec], records: &[Vec<u8>]) -> io::Result<Vec<u8>> {
    let header_length = 32 + fields.len() * 32 + 1;
    let record_length = 1 + fields.iter().map(|f| f.2 as usize).sum::<usize>();

    let mut out = Vec::new();
    out.write_u8(0x03)?;
    out.write_all(&[125, 3, 9])?;
    out.write_u32::<LittleEndian>(records.len() as u32)?;
    out.write_u16::<LittleEndian>(header_length as u16)?;
    out.write_u16::<LittleEndian>(record_length as u16)?;
    out.write_all(&[0u8; 20])?;
    for (name, code, length, decimals) in fields {
        let mut entry = [0u8; 32];
        entry[..name.len()].copy_from_slice(name.as_bytes());
        entry[11] = *code;
        entry[16] = *length;
        entry[17] = *decimals;
        out.write_all(&entry)?;
    }
    out.write_u8(FIELD_TERMINATOR)?;
    for record in records {
        assert_eq!(record.len(), record_length, "test record has wrong width");
        out.write_all(record)?;
    }
    out.write_u8(0x1A)?;
    Ok(out)
}

/// Left-pad numbers, right-pad text, as dBASE writers do
fn row(deleted: bool, cells: &[(&str, usize, bool)]) -> Vec<u8> {
    let mut out = vec![if deleted { b'*' } else { b' ' }];
    for &(value, width, right_align) in cells {
        let cell = if right_align {
            format!("{value:>width$}")
        } else {
            format!("{value:<width$}")
        };
        out.extend_from_slice(cell.as_bytes());
    }
    out
}

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(bytes).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}

const PEOPLE_FIELDS: [FieldSpec; 2] = [("NAME", b'C', 10, 0), ("AGE", b'N', 3, 0)];

fn people_file() -> NamedTempFile {
    let records = vec![
        row(false, &[("Ann", 10, false), ("30", 3, true)]),
        row(false, &[("Bo", 10, false), ("7", 3, true)]),
        row(false, &[("", 10, false), ("", 3, true)]),
    ];
    write_temp(&build_dbf(&PEOPLE_FIELDS, &records).expect("build dbf"))
}

fn records_of(events: Vec<ParseEvent>) -> Vec<Record> {
    events
        .into_iter()
        .filter_map(|e| match e {
            ParseEvent::Record(r) => Some(r),
            _ => None,
        })
        .collect()
}

/// Reader that counts how many times it is dropped
struct DropCounter<R> {
    inner: R,
    drops: Arc<AtomicUsize>,
}

impl<R: Read> Read for DropCounter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R> Drop for DropCounter<R> {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_people_file_decodes_exactly() {
        let file = people_file();
        let result = read_dbf_records(file.path(), ReadConfig::default()).unwrap();

        let json = serde_json::to_value(&result.records).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"NAME": "Ann", "AGE": 30},
                {"NAME": "Bo", "AGE": 7},
                {"NAME": "", "AGE": null},
            ])
        );
        assert_eq!(result.records.iter().map(|r| r.index).collect::<Vec<_>>(), [0, 1, 2]);
    }

    #[test]
    fn test_record_events_match_header_count() {
        let file = people_file();
        let events: Vec<_> = Session::open(file.path(), ReadConfig::default()).collect();

        let header: Arc<FileHeader> = events
            .iter()
            .find_map(|e| match e {
                ParseEvent::Header(h) => Some(Arc::clone(h)),
                _ => None,
            })
            .unwrap();
        let field_total: usize = header.fields.iter().map(|f| f.len()).sum();
        assert_eq!(field_total + 1, header.record_length as usize);

        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert!(matches!(events.last(), Some(ParseEvent::End)));
        assert_eq!(records_of(events).len(), header.number_of_records as usize);
        assert_eq!(count_dbf_records(file.path(), ReadConfig::default()).unwrap(), 3);
    }

    #[test]
    fn test_integral_fields_never_fractional() {
        let fields: [FieldSpec; 2] = [("QTY", b'N', 6, 0), ("F", b'F', 6, 0)];
        let records = vec![
            row(false, &[("12.0", 6, true), ("3.000", 6, true)]),
            row(false, &[("-4", 6, true), ("-0.0", 6, true)]),
        ];
        let file = write_temp(&build_dbf(&fields, &records).unwrap());
        let result = read_dbf_records(file.path(), ReadConfig::default()).unwrap();

        let values: Vec<_> = result
            .records
            .iter()
            .flat_map(|r| r.values.iter().map(|(_, v)| v.clone()))
            .collect();
        assert_eq!(
            values,
            [
                FieldValue::Integer(Some(12)),
                FieldValue::Integer(Some(3)),
                FieldValue::Integer(Some(-4)),
                FieldValue::Integer(Some(0)),
            ]
        );
    }

    #[test]
    fn test_two_sessions_read_identically() {
        let fields: [FieldSpec; 4] = [("CODE", b'C', 5, 0), ("PRICE", b'N', 8, 2), ("DAY", b'D', 8, 0), ("OK", b'L', 1, 0)];
        let records = vec![
            row(false, &[("A1", 5, false), ("12.50", 8, true), ("20240229", 8, false), ("T", 1, false)]),
            row(true, &[("B2", 5, false), ("-3.25", 8, true), ("", 8, false), ("?", 1, false)]),
        ];
        let file = write_temp(&build_dbf(&fields, &records).unwrap());

        let first = read_dbf_records(file.path(), ReadConfig::default()).unwrap();
        let second = read_dbf_records(file.path(), ReadConfig::default()).unwrap();
        assert_eq!(first.header, second.header);
        assert_eq!(first.records, second.records);
        assert_eq!(
            serde_json::to_string(&first.records).unwrap(),
            serde_json::to_string(&second.records).unwrap()
        );
    }

    #[test]
    fn test_blank_numeric_float_date_are_null() {
        let fields: [FieldSpec; 4] = [("N", b'N', 5, 0), ("R", b'N', 7, 2), ("F", b'F', 9, 3), ("D", b'D', 8, 0)];
        let records = vec![row(false, &[("", 5, true), ("", 7, true), ("", 9, true), ("", 8, false)])];
        let file = write_temp(&build_dbf(&fields, &records).unwrap());

        let result = read_dbf_records(file.path(), ReadConfig::default()).unwrap();
        let record = &result.records[0];
        assert_eq!(record.get("N"), Some(&FieldValue::Integer(None)));
        assert_eq!(record.get("R"), Some(&FieldValue::Real(None)));
        assert_eq!(record.get("F"), Some(&FieldValue::Real(None)));
        assert_eq!(record.get("D"), Some(&FieldValue::Date(None)));
        assert!(record.iter().all(|(_, v)| v.is_null()));
    }

    #[test]
    fn test_truncated_header_emits_single_error() {
        let bytes = build_dbf(&PEOPLE_FIELDS, &[]).unwrap();
        let file = write_temp(&bytes[..50]);

        let events: Vec<_> = Session::open(file.path(), ReadConfig::default()).collect();
        let errors = events.iter().filter(|e| matches!(e, ParseEvent::Error(_))).count();
        let headers = events.iter().filter(|e| matches!(e, ParseEvent::Header(_))).count();
        assert_eq!(errors, 1);
        assert_eq!(headers, 0);
        assert!(records_of(events).is_empty());

        let err = read_dbf_header(file.path()).unwrap_err();
        assert!(matches!(
            err,
            DbfError::Format(FormatError::HeaderTooShort { expected: 97, actual: 50 })
        ));
    }

    #[test]
    fn test_truncated_data_region_detected() {
        let records = vec![
            row(false, &[("Ann", 10, false), ("30", 3, true)]),
            row(false, &[("Bo", 10, false), ("7", 3, true)]),
        ];
        let bytes = build_dbf(&PEOPLE_FIELDS, &records).unwrap();
        let file = write_temp(&bytes[..bytes.len() - 6]);

        let err = read_dbf_records(file.path(), ReadConfig::default()).unwrap_err();
        assert!(matches!(err, DbfError::Format(FormatError::TruncatedFile { .. })));

        let lax = ReadConfig {
            check_file_size: false,
            ..ReadConfig::default()
        };
        let events: Vec<_> = Session::open(file.path(), lax).collect();
        assert!(matches!(
            events.last(),
            Some(ParseEvent::Error(DbfError::Format(FormatError::TruncatedRecord { record: 1, .. })))
        ));
        assert_eq!(records_of(events).len(), 1);
    }

    #[test]
    fn test_cancel_releases_handle_once() {
        let file = people_file();
        let drops = Arc::new(AtomicUsize::new(0));
        let reader = DropCounter {
            inner: File::open(file.path()).unwrap(),
            drops: Arc::clone(&drops),
        };

        let mut session = Session::from_reader(reader, ReadConfig::default());
        assert!(matches!(session.next(), Some(ParseEvent::Start)));
        assert!(matches!(session.next(), Some(ParseEvent::Header(_))));
        assert!(matches!(session.next(), Some(ParseEvent::Record(_))));
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        session.cancel();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(session.next().is_none());
        assert!(session.next().is_none());
        session.cancel();
        drop(session);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_released_at_end_without_drop() {
        let file = people_file();
        let drops = Arc::new(AtomicUsize::new(0));
        let reader = DropCounter {
            inner: File::open(file.path()).unwrap(),
            drops: Arc::clone(&drops),
        };

        let mut session = Session::from_reader(reader, ReadConfig::default());
        while let Some(event) = session.next() {
            if event.is_terminal() {
                break;
            }
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_file_session_matches_sync() {
        let file = people_file();
        let sync = read_dbf_records(file.path(), ReadConfig::default()).unwrap();
        let (header, records) = spawn_file_session(file.path(), ReadConfig::default())
            .collect_all()
            .await
            .unwrap();
        assert_eq!(header, sync.header);
        assert_eq!(records, sync.records);
    }

    #[tokio::test]
    async fn test_async_cancel_releases_handle() {
        use crate::models::session::ReaderSource;
        use crate::models::stream::spawn_session;

        let file = people_file();
        let drops = Arc::new(AtomicUsize::new(0));
        let reader = DropCounter {
            inner: File::open(file.path()).unwrap(),
            drops: Arc::clone(&drops),
        };
        let config = ReadConfig {
            channel_capacity: 1,
            ..ReadConfig::default()
        };
        let mut stream = spawn_session(ReaderSource::new(reader), config);
        assert!(matches!(stream.next_event().await, Some(ParseEvent::Start)));
        assert!(matches!(stream.next_event().await, Some(ParseEvent::Header(_))));
        assert!(matches!(stream.next_event().await, Some(ParseEvent::Record(_))));

        stream.cancel().await;
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
