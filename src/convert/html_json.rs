use anyhow::{anyhow, bail, Context, Result};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{ensure_dir, mirrored_parent, relative, Summary};

pub const SOURCE_NAME: &str = "lotsawahouse";
const CONTENT_DIR: &str = "OPS";
const TEXT_FILE: &str = "text0.html";
const FOOTER_FILE: &str = "footer.html";

/// One prayer as written to (and read back from) JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prayer {
    pub source: String,
    pub source_url: String,
    pub copyright: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<Title>,
    pub text: Vec<Verse>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Title {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Verse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
    #[serde(rename = "en-trans", skip_serializing_if = "Option::is_none")]
    pub en_trans: Option<String>,
}

impl Verse {
    fn is_empty(&self) -> bool {
        self.bo.is_none() && self.en.is_none() && self.en_trans.is_none()
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector `{}`: {}", css, e))
}

/// Text of the element with every text node trimmed and joined.
fn stripped_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

/// Text of the first element matching any of `candidates`, tried in order.
/// An element with no text counts as absent.
fn first_text(scope: ElementRef<'_>, candidates: &[&str]) -> Result<Option<String>> {
    for css in candidates {
        if let Some(found) = scope.select(&selector(css)?).next() {
            return Ok(Some(stripped_text(found)).filter(|t| !t.is_empty()));
        }
    }
    Ok(None)
}

/// Source URL and licence URL from the book's footer page.
pub fn parse_footer(html: &str) -> Result<(String, String)> {
    let document = Html::parse_document(html);
    let source_url = document
        .select(&selector("p.generated-txt a[href]")?)
        .next()
        .and_then(|a| a.value().attr("href"))
        .unwrap_or_default()
        .to_string();
    let copyright = document
        .select(&selector("a[rel=license]")?)
        .next()
        .and_then(|a| a.value().attr("href"))
        .unwrap_or_default()
        .to_string();
    Ok((source_url, copyright))
}

/// Titles and verses from the book's main text page.
pub fn parse_text(html: &str) -> Result<(Title, Vec<Verse>)> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title = Title {
        bo: first_text(root, &["h2.tib", "h1.tib", "h3.tib"])?,
        en: first_text(root, &["h2.eng", "h1.eng", "h3.eng"])?,
    };
    if title.bo.is_none() {
        debug!("No Tibetan title found");
    }
    if title.en.is_none() {
        debug!("No English title found");
    }

    let mut verses = Vec::new();
    for block in document.select(&selector("div.nobreak")?) {
        let verse = Verse {
            bo: first_text(block, &["p.tib-verse", "p.tib-mantra"])?,
            en: first_text(block, &["p.eng-verse", "p.eng-mantra"])?,
            en_trans: first_text(block, &["p.pho-verse", "p.pho-mantra"])?,
        };
        if !verse.is_empty() {
            verses.push(verse);
        }
    }
    Ok((title, verses))
}

/// Builds the JSON record for one extracted EPUB folder.
pub fn parse_folder(folder: &Path) -> Result<Prayer> {
    let content = folder.join(CONTENT_DIR);
    if !content.is_dir() {
        bail!("no {} folder", CONTENT_DIR);
    }
    let text_path = content.join(TEXT_FILE);
    let footer_path = content.join(FOOTER_FILE);
    if !text_path.is_file() || !footer_path.is_file() {
        bail!("missing {} or {}", TEXT_FILE, FOOTER_FILE);
    }

    let footer = fs::read_to_string(&footer_path)
        .with_context(|| format!("failed to read {}", footer_path.display()))?;
    let text = fs::read_to_string(&text_path)
        .with_context(|| format!("failed to read {}", text_path.display()))?;

    let (source_url, copyright) = parse_footer(&footer)?;
    let (title, verses) = parse_text(&text)?;
    let title = (title.bo.is_some() || title.en.is_some()).then_some(title);

    Ok(Prayer {
        source: SOURCE_NAME.to_string(),
        source_url,
        copyright,
        title,
        text: verses,
    })
}

/// Folders under `input` holding an extracted EPUB, in path order.
fn book_folders(input: &Path) -> Vec<PathBuf> {
    let mut folders: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name() == CONTENT_DIR)
        .filter_map(|e| e.path().parent().map(Path::to_path_buf))
        .collect();
    folders.sort();
    folders
}

fn write_json(input: &Path, output: &Path, folder: &Path) -> Result<(PathBuf, usize)> {
    let prayer = parse_folder(folder)?;
    let dest_dir = mirrored_parent(input, output, folder);
    fs::create_dir_all(&dest_dir)
        .with_context(|| format!("failed to create {}", dest_dir.display()))?;

    let name = folder.file_name().unwrap_or_default().to_string_lossy();
    let path = dest_dir.join(format!("{}.json", name));
    let json = serde_json::to_string_pretty(&prayer)?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok((path, prayer.text.len()))
}

/// Converts every extracted EPUB folder under `input` to a JSON file at the
/// mirrored path under `output`.
pub fn convert(input: &Path, output: &Path) -> Result<Summary> {
    ensure_dir(input)?;
    fs::create_dir_all(output).with_context(|| format!("failed to create {}", output.display()))?;
    info!("Output directory: {}", output.display());

    let folders = book_folders(input);
    let mut summary = Summary {
        found: folders.len(),
        ..Default::default()
    };
    if folders.is_empty() {
        info!("No folders found in '{}'", input.display());
        return Ok(summary);
    }
    info!("Found {} folder(s)", folders.len());

    for folder in &folders {
        match write_json(input, output, folder) {
            Ok((path, verses)) => {
                info!(
                    "Processed: {} -> {} ({} verses)",
                    relative(input, folder).display(),
                    relative(output, &path).display(),
                    verses
                );
                summary.converted += 1;
            }
            Err(e) => warn!("Error processing {}: {:#}", folder.display(), e),
        }
    }

    info!(
        "Successfully processed {}/{} folder(s)",
        summary.converted, summary.found
    );
    Ok(summary)
}
