//! Host filesystem helpers built on `cap-std` ambient directories.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::error::VolumeError;

fn io_error(path: &Utf8Path, err: &io::Error) -> VolumeError {
    VolumeError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), VolumeError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| VolumeError::Io {
        path: path.to_path_buf(),
        message: String::from("path is missing a final component"),
    })?;
    Ok((parent, file_name))
}

/// Returns `true` when `path` exists. Symlinks are not followed, so a
/// `/dev/disk/by-id` link counts as present as soon as udev creates it.
///
/// # Errors
///
/// Returns [`VolumeError::Io`] for failures other than a missing entry.
pub fn path_exists(path: &Utf8Path) -> Result<bool, VolumeError> {
    let (parent, file_name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_error(parent, &err)),
    };
    match dir.symlink_metadata(file_name) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_error(path, &err)),
    }
}

/// Creates `path` and any missing parents.
///
/// # Errors
///
/// Returns [`VolumeError::Io`] when a directory cannot be created.
pub fn create_dir_all(path: &Utf8Path) -> Result<(), VolumeError> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| io_error(path, &err))
}

/// Reads a whole file into a string.
///
/// # Errors
///
/// Returns [`VolumeError::Io`] when the file cannot be read.
pub fn read_to_string(path: &Utf8Path) -> Result<String, VolumeError> {
    let (parent, file_name) = split(path)?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| io_error(parent, &err))?;
    dir.read_to_string(file_name)
        .map_err(|err| io_error(path, &err))
}

/// Lists mount targets from a `/proc/self/mounts` style table.
///
/// Octal escapes (`\040` for space and friends) are decoded.
#[must_use]
pub fn mount_targets(table: &str) -> Vec<Utf8PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| Utf8PathBuf::from(unescape_octal(field)))
        .collect()
}

fn unescape_octal(field: &str) -> String {
    let mut decoded = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            decoded.push(ch);
            continue;
        }
        let digits: String = chars.clone().take(3).collect();
        match u8::from_str_radix(&digits, 8) {
            Ok(byte) if digits.len() == 3 => {
                decoded.push(char::from(byte));
                for _ in 0..3 {
                    chars.next();
                }
            }
            _ => decoded.push(ch),
        }
    }
    decoded
}
