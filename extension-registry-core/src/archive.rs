//! Locating and reading `package.json` inside an extension archive.
//!
//! Authors zip either the extension contents directly or a single folder holding them, and
//! macOS adds its own noise entries. The manifest is accepted at the archive root, or inside the
//! one and only top-level directory once noise is ignored.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const MANIFEST_NAME: &str = "package.json";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Error reading Zip File: The Zip File may be corrupted.")]
    Corrupt(String),

    #[error("Invalid Zip file. Could not find package.json from the extension zip")]
    ManifestMissing,
}

/// One entry of an archive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub is_dir: bool,
}

fn is_noise(top_level: &str) -> bool {
    top_level == "__MACOSX" || top_level == ".DS_Store" || top_level.starts_with("._")
}

/// Path of the manifest to read, given the archive listing.
pub fn locate_manifest(entries: &[ArchiveEntry]) -> Option<String> {
    let files: BTreeSet<&str> = entries
        .iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.name.as_str())
        .collect();
    if files.contains(MANIFEST_NAME) {
        return Some(MANIFEST_NAME.to_string());
    }

    let top_level_dirs: BTreeSet<&str> = entries
        .iter()
        .filter_map(|e| {
            let trimmed = e.name.trim_end_matches('/');
            match trimmed.split_once('/') {
                Some((first, _)) => Some(first),
                None if e.is_dir => Some(trimmed),
                None => None,
            }
        })
        .filter(|dir| !dir.is_empty() && !is_noise(dir))
        .collect();

    if top_level_dirs.len() != 1 {
        return None;
    }
    let dir = top_level_dirs.iter().next()?;
    let nested = format!("{dir}/{MANIFEST_NAME}");
    files.contains(nested.as_str()).then_some(nested)
}

fn read_manifest_blocking(zip_path: &Path) -> Result<String, ArchiveError> {
    let file = std::fs::File::open(zip_path).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        entries.push(ArchiveEntry {
            name: entry.name().to_string(),
            is_dir: entry.is_dir(),
        });
    }

    let manifest_path = locate_manifest(&entries).ok_or(ArchiveError::ManifestMissing)?;
    let mut manifest = archive
        .by_name(&manifest_path)
        .map_err(|_| ArchiveError::ManifestMissing)?;
    let mut contents = String::new();
    manifest
        .read_to_string(&mut contents)
        .map_err(|_| ArchiveError::ManifestMissing)?;
    Ok(contents)
}

/// Reads the raw `package.json` text from the archive at `zip_path`.
pub async fn read_manifest(zip_path: &Path) -> Result<String, ArchiveError> {
    let path: PathBuf = zip_path.to_path_buf();
    match tokio::task::spawn_blocking(move || read_manifest_blocking(&path)).await {
        Ok(result) => result,
        Err(join) => Err(ArchiveError::Corrupt(join.to_string())),
    }
}
