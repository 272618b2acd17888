//! Offline post-processing of a scraped tree: EPUB to ZIP, ZIP to folder,
//! folder to JSON, JSON to plain-text folders.
//!
//! Every converter walks its input once, logs each item and carries on past
//! per-item failures.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub mod epub_zip;
pub mod extract;
pub mod html_json;
pub mod json_folder;

/// How many items a converter saw and how many it handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub found: usize,
    pub converted: usize,
}

fn ensure_dir(input: &Path) -> Result<()> {
    if !input.is_dir() {
        bail!("directory '{}' not found", input.display());
    }
    Ok(())
}

/// Every file under `root` with the given extension, in path order.
fn files_with_extension(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| has_extension(p, extension))
        .collect();
    files.sort();
    files
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// The directory under `output` that mirrors `path`'s parent under `input`.
fn mirrored_parent(input: &Path, output: &Path, path: &Path) -> PathBuf {
    let relative = path
        .parent()
        .and_then(|p| p.strip_prefix(input).ok())
        .unwrap_or_else(|| Path::new(""));
    output.join(relative)
}

fn relative<'a>(base: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(base).unwrap_or(path)
}
