use std::path::{Path, PathBuf};

/// Resolve a table argument to a `.dbf` path, appending the extension when missing
pub fn resolve_dbf_path(base: &Path, file: &str) -> PathBuf {
    let path = if file.to_ascii_lowercase().ends_with("dbf") {
        PathBuf::from(file)
    } else {
        PathBuf::from(format!("{file}.dbf"))
    };
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Default model name: the file stem of the table argument
pub fn model_name(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}
