use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value, json};

use dbf_core::{FileHeader, ParseEvent, ReadConfig, Session, schema_type};

/// Fields the model marks as required
const REQUIRED_FIELDS: [&str; 2] = ["ID", "NAME"];

fn parse_error(path: &Path, err: dbf_core::DbfError) -> anyhow::Error {
    anyhow::Error::new(err).context(format!("failed to parse {}", path.display()))
}

fn load_header(path: &Path, config: &ReadConfig) -> Result<Arc<FileHeader>> {
    for event in Session::open(path, config.clone()) {
        match event {
            ParseEvent::Header(header) => return Ok(header),
            ParseEvent::Error(err) => return Err(parse_error(path, err)),
            _ => {}
        }
    }
    Err(anyhow!("{} has no header", path.display()))
}

pub fn header(out: &mut impl Write, path: &Path, config: &ReadConfig) -> Result<()> {
    let header = load_header(path, config)?;
    serde_json::to_writer_pretty(&mut *out, header.as_ref())?;
    writeln!(out)?;
    Ok(())
}

pub fn field(out: &mut impl Write, path: &Path, key: &str, config: &ReadConfig) -> Result<()> {
    let header = load_header(path, config)?;
    for field in header.fields.iter().filter(|f| f.name.eq_ignore_ascii_case(key)) {
        serde_json::to_writer_pretty(&mut *out, field)?;
        writeln!(out)?;
    }
    Ok(())
}

pub fn fields(out: &mut impl Write, path: &Path, config: &ReadConfig) -> Result<()> {
    let header = load_header(path, config)?;
    for field in &header.fields {
        writeln!(out, "{}\t\t{}", field.name, schema_type(field))?;
    }
    Ok(())
}

/// Options of the `model` command
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    pub name: String,
    pub embedded: bool,
    pub hash: bool,
}

pub fn build_model(header: &FileHeader, options: &ModelOptions) -> Value {
    let mut properties = Map::new();
    for field in &header.fields {
        let mut property = Map::new();
        property.insert("type".into(), json!(schema_type(field).to_string()));
        if REQUIRED_FIELDS.contains(&field.name.as_str()) {
            property.insert("required".into(), json!(true));
        }
        properties.insert(field.name.clone(), Value::Object(property));
    }
    if options.hash {
        properties.insert("hash".into(), json!({"type": "String", "required": true}));
    }
    json!({
        "name": options.name,
        "embedded": options.embedded,
        "properties": properties,
    })
}

pub fn model(out: &mut impl Write, path: &Path, options: &ModelOptions, config: &ReadConfig) -> Result<()> {
    let header = load_header(path, config)?;
    serde_json::to_writer_pretty(&mut *out, &build_model(&header, options))?;
    writeln!(out)?;
    Ok(())
}

pub fn map(out: &mut impl Write, path: &Path, config: &ReadConfig) -> Result<()> {
    let header = load_header(path, config)?;
    let mapping: Map<String, Value> = header
        .fields
        .iter()
        .map(|f| (f.name.to_lowercase(), json!(f.name)))
        .collect();
    serde_json::to_writer_pretty(&mut *out, &mapping)?;
    writeln!(out)?;
    Ok(())
}

pub fn count(out: &mut impl Write, path: &Path, config: &ReadConfig) -> Result<()> {
    let header = load_header(path, config)?;
    writeln!(out, "{}", header.number_of_records)?;
    Ok(())
}

pub fn sample(out: &mut impl Write, path: &Path, config: &ReadConfig) -> Result<()> {
    let config = ReadConfig {
        max_records: Some(1),
        ..config.clone()
    };
    let mut first = None;
    for event in Session::open(path, config) {
        match event {
            ParseEvent::Record(record) => first = Some(record),
            ParseEvent::Error(err) => return Err(parse_error(path, err)),
            _ => {}
        }
    }
    serde_json::to_writer_pretty(&mut *out, &first)?;
    writeln!(out)?;
    Ok(())
}

/// Stream every record into a JSON array as it is decoded
pub fn export(out: &mut impl Write, path: &Path, config: &ReadConfig) -> Result<()> {
    let mut written = 0usize;
    write!(out, "[")?;
    for event in Session::open(path, config.clone()) {
        match event {
            ParseEvent::Record(record) => {
                if written > 0 {
                    write!(out, ",")?;
                }
                writeln!(out)?;
                serde_json::to_writer(&mut *out, &record)?;
                written += 1;
            }
            ParseEvent::Error(err) => return Err(parse_error(path, err)),
            _ => {}
        }
    }
    if written > 0 {
        writeln!(out)?;
    }
    writeln!(out, "]")?;
    log::debug!("Exported {} records from {}", written, path.display());
    Ok(())
}

pub fn measure(out: &mut impl Write, path: &Path, config: &ReadConfig) -> Result<()> {
    let mut started = Instant::now();
    let mut header = None;
    for event in Session::open(path, config.clone()) {
        match event {
            ParseEvent::Start => {
                writeln!(out, "Unpacking the file")?;
                started = Instant::now();
            }
            ParseEvent::Header(h) => header = Some(h),
            ParseEvent::Record(_) => {}
            ParseEvent::End => {
                let header = header.as_ref().context("parse ended without a header")?;
                writeln!(out, "Finished parsing the file w/ {} records", header.number_of_records)?;
                writeln!(out, "Fields {}", header.fields.len())?;
                writeln!(out, "Length {}", header.record_length)?;
                writeln!(out, "The processing took: {}ms.", started.elapsed().as_millis())?;
            }
            ParseEvent::Error(err) => return Err(parse_error(path, err)),
        }
    }
    Ok(())
}
