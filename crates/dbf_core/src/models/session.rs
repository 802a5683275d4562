//! Streaming parse session
//!
//! A [`Session`] is a single-pass iterator of [`ParseEvent`]s. The first pull
//! opens the source and yields `Start`, the second decodes the header, then
//! one `Record` per record follows and exactly one terminal `End` or `Error`
//! closes the stream. The underlying reader is dropped as soon as the session
//! reaches a terminal state, is cancelled, or is itself dropped.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{DbfError, DbfResult, FormatError};
use crate::models::header::{read_full, read_header, FileHeader};
use crate::models::record::{DeletedPolicy, Record, RecordDecoder};

/// Configuration for reading DBF files
#[derive(Debug, Clone)]
pub struct ReadConfig {
    /// Whether soft-deleted records are emitted (flagged) or skipped
    pub deleted: DeletedPolicy,
    /// Substitute null for malformed non-blank values instead of failing
    pub lenient: bool,
    /// Stop after this many records have been emitted (None for all)
    pub max_records: Option<usize>,
    /// Check the declared data size against the source length when it is known
    pub check_file_size: bool,
    /// Buffered events between the worker and the consumer of an async session
    pub channel_capacity: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            deleted: DeletedPolicy::Surface,
            lenient: false,
            max_records: None,
            check_file_size: true,
            channel_capacity: 64,
        }
    }
}

/// Notifications emitted by a session, in order
#[derive(Debug)]
pub enum ParseEvent {
    Start,
    Header(Arc<FileHeader>),
    Record(Record),
    End,
    Error(DbfError),
}

impl ParseEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ParseEvent::End | ParseEvent::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Started,
    HeaderRead,
    Streaming,
    Ended,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed | SessionState::Cancelled)
    }
}

/// Something a session can open lazily on its first pull
pub trait ByteSource {
    type Reader: Read;

    /// Open the source, returning the reader and its total length if known
    fn open(self) -> io::Result<(Self::Reader, Option<u64>)>;
}

/// A DBF file on disk
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ByteSource for FileSource {
    type Reader = BufReader<File>;

    fn open(self) -> io::Result<(Self::Reader, Option<u64>)> {
        let file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        log::debug!("Opened {} ({} bytes)", self.path.display(), len);
        Ok((BufReader::new(file), Some(len)))
    }
}

/// An already open reader, positioned at the start of the DBF data
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    len: Option<u64>,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, len: None }
    }

    /// Declare the total length so the file-size invariant can be checked
    pub fn with_len(reader: R, len: u64) -> Self {
        Self {
            reader,
            len: Some(len),
        }
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    type Reader = R;

    fn open(self) -> io::Result<(R, Option<u64>)> {
        Ok((self.reader, self.len))
    }
}

pub struct Session<S: ByteSource> {
    state: SessionState,
    source: Option<S>,
    reader: Option<S::Reader>,
    source_len: Option<u64>,
    config: ReadConfig,
    header: Option<Arc<FileHeader>>,
    decoder: Option<RecordDecoder>,
    next_index: usize,
    emitted: usize,
    buf: Vec<u8>,
}

impl Session<FileSource> {
    /// Session over a file; nothing is opened until the first event is pulled
    pub fn open<P: AsRef<Path>>(path: P, config: ReadConfig) -> Self {
        Self::new(FileSource::new(path), config)
    }
}

impl<R: Read> Session<ReaderSource<R>> {
    pub fn from_reader(reader: R, config: ReadConfig) -> Self {
        Self::new(ReaderSource::new(reader), config)
    }
}

impl<S: ByteSource> Session<S> {
    pub fn new(source: S, config: ReadConfig) -> Self {
        Self {
            state: SessionState::Idle,
            source: Some(source),
            reader: None,
            source_len: None,
            config,
            header: None,
            decoder: None,
            next_index: 0,
            emitted: 0,
            buf: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The decoded header, once the `Header` event has been emitted
    pub fn header(&self) -> Option<&Arc<FileHeader>> {
        self.header.as_ref()
    }

    /// Number of `Record` events emitted so far
    pub fn records_emitted(&self) -> usize {
        self.emitted
    }

    /// Abandon the session: the reader is released and no further events fire
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        log::debug!("Session cancelled after {} records", self.emitted);
        self.release();
        self.state = SessionState::Cancelled;
    }

    /// Drain the session into its header and records, stopping at the first error
    pub fn collect_all(self) -> DbfResult<(Arc<FileHeader>, Vec<Record>)> {
        let mut header = None;
        let mut records = Vec::new();
        for event in self {
            match event {
                ParseEvent::Header(h) => header = Some(h),
                ParseEvent::Record(record) => records.push(record),
                ParseEvent::Error(err) => return Err(err),
                ParseEvent::Start | ParseEvent::End => {}
            }
        }
        let header = header.ok_or_else(|| {
            DbfError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "session ended without a header",
            ))
        })?;
        Ok((header, records))
    }

    fn release(&mut self) {
        self.reader = None;
        self.source = None;
    }

    fn fail(&mut self, err: DbfError) -> Option<ParseEvent> {
        log::debug!("Session failed in state {:?}: {}", self.state, err);
        self.release();
        self.state = SessionState::Failed;
        Some(ParseEvent::Error(err))
    }

    fn start(&mut self) -> Option<ParseEvent> {
        let source = self.source.take()?;
        match source.open() {
            Ok((reader, len)) => {
                self.reader = Some(reader);
                self.source_len = len;
                self.state = SessionState::Started;
                Some(ParseEvent::Start)
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn decode_header(&mut self) -> Option<ParseEvent> {
        let Some(reader) = self.reader.as_mut() else {
            return self.fail(released());
        };
        let header = match read_header(reader) {
            Ok(header) => header,
            Err(e) => return self.fail(e),
        };
        if let (true, Some(len)) = (self.config.check_file_size, self.source_len) {
            if let Err(e) = header.validate_file_size(len) {
                return self.fail(e.into());
            }
        }

        let header = Arc::new(header);
        self.decoder = Some(RecordDecoder::new(Arc::clone(&header)).lenient(self.config.lenient));
        self.buf = vec![0u8; header.record_length as usize];
        self.header = Some(Arc::clone(&header));
        self.state = SessionState::HeaderRead;
        Some(ParseEvent::Header(header))
    }

    fn finish(&mut self) -> Option<ParseEvent> {
        log::info!(
            "Finished parsing {} of {} records",
            self.emitted,
            self.header.as_ref().map_or(0, |h| h.number_of_records)
        );
        self.release();
        self.state = SessionState::Ended;
        Some(ParseEvent::End)
    }

    fn next_record(&mut self) -> Option<ParseEvent> {
        self.state = SessionState::Streaming;
        let total = self
            .header
            .as_ref()
            .map_or(0, |h| h.number_of_records as usize);

        loop {
            let limit_reached = self.config.max_records.is_some_and(|max| self.emitted >= max);
            if self.next_index >= total || limit_reached {
                return self.finish();
            }

            let index = self.next_index;
            let (Some(reader), Some(decoder)) = (self.reader.as_mut(), self.decoder.as_ref()) else {
                return self.fail(released());
            };
            let read = match read_full(reader, &mut self.buf) {
                Ok(n) => n,
                Err(e) => return self.fail(e.into()),
            };
            if read < self.buf.len() {
                let err = FormatError::TruncatedRecord {
                    record: index,
                    expected: self.buf.len(),
                    actual: read,
                };
                return self.fail(err.into());
            }
            self.next_index += 1;

            let outcome = match decoder.is_deleted(index, &self.buf) {
                Ok(true) if self.config.deleted == DeletedPolicy::Skip => {
                    log::trace!("Skipping deleted record {}", index);
                    continue;
                }
                Ok(_) => decoder.decode(index, &self.buf),
                Err(e) => Err(e),
            };
            return match outcome {
                Ok(record) => {
                    self.emitted += 1;
                    Some(ParseEvent::Record(record))
                }
                Err(e) => self.fail(e.into()),
            };
        }
    }
}

fn released() -> DbfError {
    DbfError::Io(io::Error::other("source already released"))
}

impl<S: ByteSource> Iterator for Session<S> {
    type Item = ParseEvent;

    fn next(&mut self) -> Option<ParseEvent> {
        match self.state {
            SessionState::Idle => self.start(),
            SessionState::Started => self.decode_header(),
            SessionState::HeaderRead | SessionState::Streaming => self.next_record(),
            SessionState::Ended | SessionState::Failed | SessionState::Cancelled => None,
        }
    }
}

/// Read only the header of a DBF file; the file is closed before returning
pub fn read_dbf_header<P: AsRef<Path>>(path: P) -> DbfResult<Arc<FileHeader>> {
    let mut session = Session::open(path, ReadConfig::default());
    for event in session.by_ref() {
        match event {
            ParseEvent::Header(header) => return Ok(header),
            ParseEvent::Error(err) => return Err(err),
            _ => {}
        }
    }
    Err(released())
}

/// Result of reading a whole DBF file
#[derive(Debug)]
pub struct DbfReadResult {
    pub header: Arc<FileHeader>,
    pub records: Vec<Record>,
}

impl DbfReadResult {
    pub fn records_read(&self) -> usize {
        self.records.len()
    }
}

/// Read the header and every record of a DBF file
pub fn read_dbf_records<P: AsRef<Path>>(path: P, config: ReadConfig) -> DbfResult<DbfReadResult> {
    let (header, records) = Session::open(path, config).collect_all()?;
    Ok(DbfReadResult { header, records })
}

/// Count records by streaming through the file, without retaining them
pub fn count_dbf_records<P: AsRef<Path>>(path: P, config: ReadConfig) -> DbfResult<usize> {
    let mut count = 0;
    for event in Session::open(path, config) {
        match event {
            ParseEvent::Record(_) => count += 1,
            ParseEvent::Error(err) => return Err(err),
            _ => {}
        }
    }
    Ok(count)
}
