pub mod text;
pub mod header;
pub mod record;
pub mod schema;
pub mod session;
pub mod stream;

#[cfg(test)]
mod integration_tests;

pub use header::{FieldDescriptor, FieldType, FileHeader, decode_header, read_header};
pub use record::{DeletedPolicy, FieldValue, Record, RecordDecoder, decode_field};
pub use schema::{SchemaType, schema_type};
pub use session::{
    ByteSource, DbfReadResult, FileSource, ParseEvent, ReadConfig, ReaderSource, Session,
    SessionState, count_dbf_records, read_dbf_header, read_dbf_records,
};
pub use stream::{SessionStream, read_dbf_header_async, spawn_file_session, spawn_session};
