use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use dbf_core::{DeletedPolicy, ReadConfig};

mod commands;
mod paths;

use commands::ModelOptions;
use paths::{model_name, resolve_dbf_path};

#[derive(Parser)]
#[command(name = "dbf-inspect", version, about = "Inspect and export dBASE tables")]
struct Cli {
    /// Directory table arguments are resolved against
    #[arg(short = 'd', long, global = true, default_value = ".")]
    working_dir: PathBuf,

    /// Leave records flagged as deleted out of the output
    #[arg(long, global = true)]
    skip_deleted: bool,

    /// Decode malformed values as null instead of failing
    #[arg(long, global = true)]
    lenient: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the decoded header as JSON
    Header { file: String },
    /// Print the descriptor of one field
    Field { file: String, key: String },
    /// List field names with their schema types
    Fields { file: String },
    /// Print a JSON model derived from the field list
    Model {
        file: String,
        /// Model name, defaults to the file stem
        #[arg(short = 'n', long)]
        name: Option<String>,
        /// Mark the model as embedded
        #[arg(short = 'e', long)]
        embedded: bool,
        /// Add a required `hash` property
        #[arg(long)]
        hash: bool,
    },
    /// Print a lowercase-name to field-name mapping
    Map {
        file: String,
        /// Accepted for compatibility with `model`; has no effect
        #[arg(short = 'n', long, hide = true)]
        name: Option<String>,
        /// Accepted for compatibility with `model`; has no effect
        #[arg(short = 'e', long, hide = true)]
        embedded: bool,
    },
    /// Print the record count declared in the header
    Count { file: String },
    /// Print the first record as JSON
    Sample { file: String },
    /// Stream every record as a JSON array
    Export { file: String },
    /// Parse the whole file and report timing
    Measure { file: String },
}

impl Cli {
    fn read_config(&self) -> ReadConfig {
        ReadConfig {
            deleted: if self.skip_deleted {
                DeletedPolicy::Skip
            } else {
                DeletedPolicy::Surface
            },
            lenient: self.lenient,
            ..ReadConfig::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.read_config();
    let base = &cli.working_dir;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Commands::Header { file } => commands::header(&mut out, &resolve_dbf_path(base, file), &config)?,
        Commands::Field { file, key } => {
            commands::field(&mut out, &resolve_dbf_path(base, file), key, &config)?
        }
        Commands::Fields { file } => commands::fields(&mut out, &resolve_dbf_path(base, file), &config)?,
        Commands::Model {
            file,
            name,
            embedded,
            hash,
        } => {
            let options = ModelOptions {
                name: name.clone().unwrap_or_else(|| model_name(file)),
                embedded: *embedded,
                hash: *hash,
            };
            commands::model(&mut out, &resolve_dbf_path(base, file), &options, &config)?
        }
        Commands::Map {
            file,
            name,
            embedded,
        } => {
            if name.is_some() || *embedded {
                log::debug!("map ignores --name and --embedded");
            }
            commands::map(&mut out, &resolve_dbf_path(base, file), &config)?
        }
        Commands::Count { file } => commands::count(&mut out, &resolve_dbf_path(base, file), &config)?,
        Commands::Sample { file } => commands::sample(&mut out, &resolve_dbf_path(base, file), &config)?,
        Commands::Export { file } => commands::export(&mut out, &resolve_dbf_path(base, file), &config)?,
        Commands::Measure { file } => commands::measure(&mut out, &resolve_dbf_path(base, file), &config)?,
    }

    out.flush().context("failed to flush stdout")?;
    Ok(())
}
