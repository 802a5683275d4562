//! Async adapters over [`Session`]
//!
//! The session runs on a blocking tokio worker and forwards its events through
//! a bounded channel. Dropping or cancelling the stream stops the worker at the
//! next event boundary, which releases the source.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::{DbfError, DbfResult};
use crate::models::header::FileHeader;
use crate::models::record::Record;
use crate::models::session::{
    read_dbf_header, ByteSource, FileSource, ParseEvent, ReadConfig, Session,
};

/// Receiving end of a session running on a blocking worker
pub struct SessionStream {
    events: mpsc::Receiver<ParseEvent>,
    worker: JoinHandle<()>,
}

impl SessionStream {
    /// Next event in emission order, or None once the session is over
    pub async fn next_event(&mut self) -> Option<ParseEvent> {
        self.events.recv().await
    }

    /// Stop consuming and wait until the worker has released the source
    pub async fn cancel(self) {
        drop(self.events);
        if let Err(e) = self.worker.await {
            log::warn!("Session worker did not shut down cleanly: {}", e);
        }
    }

    /// Drain the stream into its header and records, stopping at the first error
    pub async fn collect_all(mut self) -> DbfResult<(Arc<FileHeader>, Vec<Record>)> {
        let mut header = None;
        let mut records = Vec::new();
        while let Some(event) = self.next_event().await {
            match event {
                ParseEvent::Header(h) => header = Some(h),
                ParseEvent::Record(record) => records.push(record),
                ParseEvent::Error(err) => {
                    self.cancel().await;
                    return Err(err);
                }
                ParseEvent::Start | ParseEvent::End => {}
            }
        }
        header.map(|h| (h, records)).ok_or_else(|| {
            DbfError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "session ended without a header",
            ))
        })
    }
}

/// Run a session over any source on a blocking worker
pub fn spawn_session<S>(source: S, config: ReadConfig) -> SessionStream
where
    S: ByteSource + Send + 'static,
{
    let (tx, events) = mpsc::channel(config.channel_capacity.max(1));
    let worker = tokio::task::spawn_blocking(move || {
        let mut session = Session::new(source, config);
        while let Some(event) = session.next() {
            if tx.blocking_send(event).is_err() {
                log::debug!("Event receiver dropped; cancelling session");
                session.cancel();
                break;
            }
        }
    });
    SessionStream { events, worker }
}

/// Run a session over a file on a blocking worker
pub fn spawn_file_session<P: AsRef<Path>>(path: P, config: ReadConfig) -> SessionStream {
    spawn_session(FileSource::new(path), config)
}

/// Asynchronously read only the header of a DBF file
pub async fn read_dbf_header_async<P: AsRef<Path>>(path: P) -> DbfResult<Arc<FileHeader>> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || read_dbf_header(path))
        .await
        .map_err(|e| DbfError::Io(std::io::Error::other(format!("Task join error: {}", e))))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::ReaderSource;
    use std::io::Cursor;

    fn one_field_file(values: &[&[u8]]) -> Vec<u8> {
        let mut bytes = vec![0x03, 125, 1, 1];
        bytes.extend_from_slice(&(values.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&65u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.resize(32, 0);
        let mut entry = [0u8; 32];
        entry[..2].copy_from_slice(b"ID");
        entry[11] = b'N';
        entry[16] = 3;
        bytes.extend_from_slice(&entry);
        bytes.push(0x0D);
        for value in values {
            bytes.push(b' ');
            bytes.extend_from_slice(value);
        }
        bytes
    }

    #[tokio::test]
    async fn test_stream_preserves_order() {
        let bytes = one_field_file(&[b"  1", b"  2", b"  3"]);
        let config = ReadConfig {
            channel_capacity: 1,
            ..ReadConfig::default()
        };
        let mut stream = spawn_session(ReaderSource::new(Cursor::new(bytes)), config);

        assert!(matches!(stream.next_event().await, Some(ParseEvent::Start)));
        assert!(matches!(stream.next_event().await, Some(ParseEvent::Header(_))));
        for expected in 1..=3 {
            match stream.next_event().await {
                Some(ParseEvent::Record(r)) => assert_eq!(r.get("ID").and_then(|v| v.as_i64()), Some(expected)),
                other => panic!("expected record, got {:?}", other),
            }
        }
        assert!(matches!(stream.next_event().await, Some(ParseEvent::End)));
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_collect_all() {
        let bytes = one_field_file(&[b" 10", b"   "]);
        let stream = spawn_session(ReaderSource::new(Cursor::new(bytes)), ReadConfig::default());
        let (header, records) = stream.collect_all().await.unwrap();
        assert_eq!(header.number_of_records, 2);
        assert_eq!(records.len(), 2);
        assert!(records[1].get("ID").is_some_and(|v| v.is_null()));
    }

    #[tokio::test]
    async fn test_stream_reports_errors() {
        let bytes = one_field_file(&[b" 10", b" zz"]);
        let stream = spawn_session(ReaderSource::new(Cursor::new(bytes)), ReadConfig::default());
        assert!(stream.collect_all().await.unwrap_err().is_format());
    }

    #[tokio::test]
    async fn test_header_async_missing_file() {
        assert!(read_dbf_header_async("/nonexistent/table.dbf").await.is_err());
    }
}
