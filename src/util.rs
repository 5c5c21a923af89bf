//! Path helpers shared by configuration and bootstrap rendering.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If the `HOME` environment variable is not set, the input is returned
/// unchanged.
///
/// # Examples
///
/// ```
/// # use buildvm::util::expand_tilde;
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Reads a whole file through an ambient-authority directory handle.
///
/// # Errors
///
/// Returns the I/O error message when the parent directory cannot be opened
/// or the file cannot be read.
pub fn read_ambient(path: &Utf8Path) -> Result<Vec<u8>, String> {
    let (dir_path, file_path) = split_path(path)?;
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read(file_path).map_err(|err| err.to_string())
}

/// Reads a UTF-8 file through an ambient-authority directory handle.
///
/// # Errors
///
/// Returns the I/O error message when the file cannot be read or is not
/// valid UTF-8.
pub fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let (dir_path, file_path) = split_path(path)?;
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &Utf8Path), String> {
    if !path.is_absolute() {
        return Ok((Utf8Path::new("."), path));
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("path has no parent directory: {path}"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("path has no file name: {path}"))?;
    Ok((parent, Utf8Path::new(file_name)))
}
