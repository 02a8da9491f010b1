//! Destination file handling
//!
//! Filename generation, the write/overwrite/append open policy, and the
//! post-capture UTF-8 check.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use serde::Deserialize;

use crate::error::{CaptureError, Result};

/// How an existing destination file is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Create a new file; refuse if it already exists
    #[default]
    Write,
    /// Truncate an existing file
    Overwrite,
    /// Add to the end of an existing file
    Append,
}

/// Timestamped filename, e.g. `capture_20261019_153045.txt`
pub fn default_filename<Tz: TimeZone>(now: &DateTime<Tz>, prefix: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}.txt", prefix, now.format("%Y%m%d_%H%M%S"))
}

/// `dir/stem_NNNN.ext` using the smallest 4-digit number not already taken
/// by a sibling with the same stem and extension.
pub fn numbered_filename(base: &Path) -> io::Result<PathBuf> {
    let dir = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "filename has no stem"))?;
    let ext = base.extension().and_then(|e| e.to_str());

    let mut taken = Vec::new();
    if dir.exists() {
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            if let Some(n) = name.to_str().and_then(|n| parse_suffix(n, stem, ext)) {
                taken.push(n);
            }
        }
    }
    taken.sort_unstable();

    let mut number = 1;
    for n in taken {
        if n == number {
            number += 1;
        } else if n > number {
            break;
        }
    }
    if number > 9999 {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("all numbered variants of {} are taken", base.display()),
        ));
    }

    let name = match ext {
        Some(ext) => format!("{}_{:04}.{}", stem, number, ext),
        None => format!("{}_{:04}", stem, number),
    };
    Ok(base.with_file_name(name))
}

/// Number in `stem_NNNN.ext`, if `name` has that shape
fn parse_suffix(name: &str, stem: &str, ext: Option<&str>) -> Option<u32> {
    let rest = name.strip_prefix(stem)?.strip_prefix('_')?;
    let digits = match ext {
        Some(ext) => rest.strip_suffix(ext)?.strip_suffix('.')?,
        None => rest,
    };
    if digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// Refuse write mode on an existing file before the terminal is touched.
pub fn check_target(path: &Path, mode: WriteMode) -> Result<()> {
    if mode == WriteMode::Write && path.exists() {
        return Err(CaptureError::Configuration(format!(
            "{} already exists (use --mode overwrite or --mode append)",
            path.display()
        )));
    }
    Ok(())
}

/// Open the destination according to `mode`.
pub fn open_destination(path: &Path, mode: WriteMode) -> Result<File> {
    let mut options = OpenOptions::new();
    match mode {
        WriteMode::Write => options.write(true).create_new(true),
        WriteMode::Overwrite => options.write(true).create(true).truncate(true),
        WriteMode::Append => options.append(true).create(true),
    };
    options.open(path).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => CaptureError::Configuration(format!(
            "{} already exists (use --mode overwrite or --mode append)",
            path.display()
        )),
        _ => CaptureError::Io(e),
    })
}

/// Check that the written file is well-formed UTF-8.
pub fn validate_utf8(path: &Path) -> Result<()> {
    let bytes = fs::read(path)?;
    std::str::from_utf8(&bytes).map_err(|e| CaptureError::Validation {
        path: path.to_path_buf(),
        offset: e.valid_up_to(),
    })?;
    Ok(())
}
