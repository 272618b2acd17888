use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::{ensure_dir, files_with_extension, mirrored_parent, relative, Summary};

/// Copies every EPUB under `input` to a `.zip` at the mirrored path under
/// `output`. EPUBs are zip archives already, so only the name changes.
pub fn convert(input: &Path, output: &Path) -> Result<Summary> {
    ensure_dir(input)?;
    let epubs = files_with_extension(input, "epub");
    let mut summary = Summary {
        found: epubs.len(),
        ..Default::default()
    };
    if epubs.is_empty() {
        info!("No EPUB files found in '{}'", input.display());
        return Ok(summary);
    }
    info!("Found {} EPUB file(s)", epubs.len());

    for epub in &epubs {
        match copy_as_zip(input, output, epub) {
            Ok(zip) => {
                info!("{} -> {}", relative(input, epub).display(), relative(output, &zip).display());
                summary.converted += 1;
            }
            Err(e) => warn!("Skipping {}: {:#}", epub.display(), e),
        }
    }

    info!("Converted {} file(s)", summary.converted);
    Ok(summary)
}

fn copy_as_zip(input: &Path, output: &Path, epub: &Path) -> Result<std::path::PathBuf> {
    let dest_dir = mirrored_parent(input, output, epub);
    fs::create_dir_all(&dest_dir)
        .with_context(|| format!("failed to create {}", dest_dir.display()))?;
    let zip = dest_dir.join(epub.with_extension("zip").file_name().unwrap_or_default());
    fs::copy(epub, &zip).with_context(|| format!("failed to copy to {}", zip.display()))?;
    Ok(zip)
}
