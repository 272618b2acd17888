use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

use super::html_json::{Prayer, Verse};
use super::{ensure_dir, has_extension, Summary};

/// Title line followed by every non-empty verse, each newline terminated.
fn render(title: &str, verses: &[Verse], pick: impl Fn(&Verse) -> Option<&str>) -> String {
    let mut out = format!("{}\n", title);
    for line in verses.iter().filter_map(|v| pick(v)).filter(|l| !l.is_empty()) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// The title as a single folder name directly under the output directory.
fn folder_name(title: &str) -> Result<&str> {
    let mut components = Path::new(title).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !title.trim().is_empty() => Ok(title),
        _ => bail!("title {:?} is not a usable folder name", title),
    }
}

/// Writes `<output>/<Tibetan title>/bo.txt` and `en.txt` for one prayer.
pub fn write_folder(prayer: &Prayer, output: &Path) -> Result<PathBuf> {
    let title = prayer
        .title
        .as_ref()
        .ok_or_else(|| anyhow!("no title"))?;
    let bo_title = title.bo.as_deref().ok_or_else(|| anyhow!("no Tibetan title"))?;
    let en_title = title.en.as_deref().ok_or_else(|| anyhow!("no English title"))?;

    let folder = output.join(folder_name(bo_title)?);
    fs::create_dir_all(&folder).with_context(|| format!("failed to create {}", folder.display()))?;
    fs::write(folder.join("bo.txt"), render(bo_title, &prayer.text, |v| v.bo.as_deref()))?;
    fs::write(folder.join("en.txt"), render(en_title, &prayer.text, |v| v.en.as_deref()))?;
    Ok(folder)
}

fn convert_file(path: &Path, output: &Path) -> Result<PathBuf> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let prayer: Prayer = serde_json::from_str(&raw).context("invalid prayer JSON")?;
    write_folder(&prayer, output)
}

/// Turns every JSON file directly inside `input` into a folder of plain
/// text files under `output`.
pub fn convert(input: &Path, output: &Path) -> Result<Summary> {
    ensure_dir(input)?;
    let mut files: Vec<PathBuf> = fs::read_dir(input)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, "json"))
        .collect();
    files.sort();

    let mut summary = Summary {
        found: files.len(),
        ..Default::default()
    };
    for file in &files {
        match convert_file(file, output) {
            Ok(folder) => {
                info!("{} -> {}", file.display(), folder.display());
                summary.converted += 1;
            }
            Err(e) => warn!("Skipping {}: {:#}", file.display(), e),
        }
    }

    info!("Wrote {}/{} folder(s)", summary.converted, summary.found);
    Ok(summary)
}
