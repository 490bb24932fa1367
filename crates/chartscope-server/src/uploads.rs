use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

const FALLBACK_FILE_NAME: &str = "upload";

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Writes each upload as `<dir>/<YYYYMMDD_HHMMSS>_<name>` and returns the saved paths in order.
///
/// Names already taken get a `_N` suffix; files are created exclusively so
/// concurrent requests never share a path.
pub fn save_all(dir: &Path, images: &[UploadedImage], now: DateTime<Local>) -> Result<Vec<String>> {
    fs::create_dir_all(dir).with_context(|| format!("failed creating {}", dir.display()))?;
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let mut saved = Vec::with_capacity(images.len());
    for image in images {
        let file_name = format!("{stamp}_{}", sanitize_file_name(&image.file_name));
        let (path, mut file) = create_unique(dir, &file_name)?;
        file.write_all(&image.bytes)
            .with_context(|| format!("failed saving upload {}", path.display()))?;
        saved.push(path.to_string_lossy().into_owned());
    }
    Ok(saved)
}

/// Keeps only the final path component of a client-supplied file name.
fn sanitize_file_name(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches('.');
    if base.is_empty() {
        return FALLBACK_FILE_NAME.to_string();
    }
    base.chars()
        .map(|ch| if ch.is_control() { '_' } else { ch })
        .collect()
}

fn create_unique(dir: &Path, file_name: &str) -> Result<(PathBuf, File)> {
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };
    let mut idx = 0usize;
    loop {
        let name = match (idx, ext) {
            (0, _) => file_name.to_string(),
            (_, Some(ext)) => format!("{stem}_{idx}.{ext}"),
            (_, None) => format!("{stem}_{idx}"),
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => idx += 1,
            Err(err) => {
                return Err(err).with_context(|| format!("failed creating {}", path.display()))
            }
        }
    }
}
