use std::io;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use url::Url;

const FALLBACK_FILE_NAME: &str = "download";

/// Sanitize filename to remove invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Last non-empty path segment of `url`, percent-decoded, or `download`
/// when there is none.
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| sanitize_filename(&percent_decode_str(segment).decode_utf8_lossy()))
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Resolve where `source` should land, relative to `base`.
///
/// An override is joined onto `base` (an absolute override wins); otherwise
/// the file name of the source is used.
pub fn resolve_destination(base: &Path, source: &Url, destination: Option<&str>) -> PathBuf {
    match destination {
        Some(destination) => base.join(destination),
        None => base.join(file_name_from_url(source)),
    }
}

/// Same as [`resolve_destination`] against the process working directory.
pub fn resolve_in_current_dir(source: &Url, destination: Option<&str>) -> io::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(resolve_destination(&cwd, source, destination))
}
