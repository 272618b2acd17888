use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::ZipArchive;

use super::{ensure_dir, files_with_extension, mirrored_parent, relative, Summary};

/// Unpacks every zip under `input` into a folder named after the archive,
/// at the mirrored path under `output`.
pub fn extract_all(input: &Path, output: &Path) -> Result<Summary> {
    ensure_dir(input)?;
    fs::create_dir_all(output).with_context(|| format!("failed to create {}", output.display()))?;

    let zips = files_with_extension(input, "zip");
    let mut summary = Summary {
        found: zips.len(),
        ..Default::default()
    };
    if zips.is_empty() {
        info!("No ZIP files found in '{}'", input.display());
        return Ok(summary);
    }
    info!("Found {} ZIP file(s)", zips.len());

    for zip in &zips {
        match extract_one(input, output, zip) {
            Ok(folder) => {
                info!("{} -> {}/", relative(input, zip).display(), relative(output, &folder).display());
                summary.converted += 1;
            }
            Err(e) => warn!("Skipping {}: {:#}", zip.display(), e),
        }
    }

    info!("Extracted {} file(s) to '{}'", summary.converted, output.display());
    Ok(summary)
}

fn extract_one(input: &Path, output: &Path, zip: &Path) -> Result<PathBuf> {
    let stem = zip.file_stem().unwrap_or_default();
    let folder = mirrored_parent(input, output, zip).join(stem);

    let file = File::open(zip).with_context(|| format!("failed to open {}", zip.display()))?;
    let mut archive = ZipArchive::new(file).context("not a zip archive")?;
    archive
        .extract(&folder)
        .with_context(|| format!("failed to extract into {}", folder.display()))?;
    Ok(folder)
}
