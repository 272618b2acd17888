//! Mapping a finished download onto the topic and language folders.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::error::{Result, ScrapeError};
use crate::language::{is_tibetan_char, LanguageDir};
use crate::observe::Observer;

pub const FALLBACK_FOLDER: &str = "Misc";

/// Turns a topic label into a folder name: keeps alphanumerics, space, `-`,
/// `_` and Tibetan characters, trims, and NFC-normalizes.
///
/// Composition happens before filtering as well, so a decomposed accent is
/// kept like its precomposed form.
pub fn sanitize_label(label: &str) -> String {
    let kept: String = label
        .nfc()
        .filter(|&c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') || is_tibetan_char(c))
        .collect();
    let normalized: String = kept.trim().nfc().collect();
    if normalized.is_empty() {
        FALLBACK_FOLDER.to_string()
    } else {
        normalized
    }
}

/// First free path of the form `stem.ext`, `stem (1).ext`, `stem (2).ext`, ...
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| path.with_file_name(format!("{} ({}){}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Where each copy of a download is meant to go, before touching the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementPlan {
    pub primary: PathBuf,
    pub secondary: Vec<PathBuf>,
    pub language: Option<PathBuf>,
}

/// Folder layout for `topics` and `language` under `root`. Duplicate folder
/// names after sanitization are only listed once.
pub fn plan(root: &Path, topics: &[String], language: Option<LanguageDir>) -> PlacementPlan {
    let mut folders: Vec<PathBuf> = Vec::new();
    for topic in topics {
        let folder = root.join(sanitize_label(topic));
        if !folders.contains(&folder) {
            folders.push(folder);
        }
    }
    let mut folders = folders.into_iter();
    let primary = folders.next().unwrap_or_else(|| root.join(FALLBACK_FOLDER));

    PlacementPlan {
        primary,
        secondary: folders.collect(),
        language: language.map(|l| root.join(l.folder_name())),
    }
}

/// Moves downloads out of the download directory into the output tree.
pub struct Placer<'a> {
    root: PathBuf,
    observer: &'a dyn Observer,
}

impl<'a> Placer<'a> {
    pub fn new(root: &Path, observer: &'a dyn Observer) -> Self {
        Self {
            root: root.to_path_buf(),
            observer,
        }
    }

    /// Moves `downloaded` into the first topic's folder, then copies it into
    /// every other topic folder and the language folder, if any.
    ///
    /// Returns the primary path. If the move itself fails the file stays
    /// where it was downloaded and that path is returned; copy failures are
    /// only logged.
    pub fn place(
        &self,
        downloaded: &Path,
        topics: &[String],
        language: Option<LanguageDir>,
    ) -> PathBuf {
        let plan = plan(&self.root, topics, language);

        let final_path = match move_into(downloaded, &plan.primary) {
            Ok(path) => {
                self.observer.placed(&path, true);
                path
            }
            Err(e) => {
                warn!("{}; leaving it at {}", e, downloaded.display());
                downloaded.to_path_buf()
            }
        };

        for folder in plan.secondary.iter().chain(plan.language.iter()) {
            match copy_into(&final_path, folder) {
                Ok(path) => self.observer.placed(&path, false),
                Err(e) => warn!("{}", e),
            }
        }

        final_path
    }

    /// Moves a download into a top-level language folder without fanning it
    /// out across topics.
    pub fn place_language_only(&self, downloaded: &Path, language: LanguageDir) -> Result<PathBuf> {
        let path = move_into(downloaded, &self.root.join(language.folder_name()))?;
        info!("Moved {} EPUB to {}", language, path.display());
        self.observer.placed(&path, true);
        Ok(path)
    }
}

fn target_in(file: &Path, folder: &Path) -> Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| ScrapeError::Placement {
        path: file.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
    })?;
    fs::create_dir_all(folder).map_err(|source| ScrapeError::Placement {
        path: folder.to_path_buf(),
        source,
    })?;
    Ok(unique_path(&folder.join(name)))
}

/// Renames `file` into `folder`, resolving name collisions.
pub fn move_into(file: &Path, folder: &Path) -> Result<PathBuf> {
    let target = target_in(file, folder)?;
    fs::rename(file, &target).map_err(|source| ScrapeError::Placement {
        path: target.clone(),
        source,
    })?;
    Ok(target)
}

/// Copies `file` into `folder`, resolving name collisions. The source is
/// left untouched.
pub fn copy_into(file: &Path, folder: &Path) -> Result<PathBuf> {
    let target = target_in(file, folder)?;
    fs::copy(file, &target).map_err(|source| ScrapeError::Placement {
        path: target.clone(),
        source,
    })?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::NoopObserver;

    fn topics(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sanitize_drops_punctuation() {
        assert_eq!(sanitize_label("Prayers: Long-Life / Dedication!"), "Prayers Long-Life  Dedication");
        assert_eq!(sanitize_label("  Aspirations  "), "Aspirations");
        assert_eq!(sanitize_label("snake_case 2"), "snake_case 2");
    }

    #[test]
    fn test_sanitize_keeps_tibetan() {
        assert_eq!(sanitize_label("སྨོན་ལམ། (Aspirations)"), "སྨོན་ལམ། Aspirations");
    }

    #[test]
    fn test_sanitize_falls_back_to_misc() {
        assert_eq!(sanitize_label("???"), FALLBACK_FOLDER);
        assert_eq!(sanitize_label(""), FALLBACK_FOLDER);
    }

    #[test]
    fn test_sanitize_normalizes_to_nfc() {
        // "é" as 'e' + combining acute accent.
        let decomposed = "Pri\u{0065}\u{0301}re";
        assert_eq!(sanitize_label(decomposed), "Pri\u{00E9}re");
        assert_eq!(sanitize_label(decomposed), sanitize_label("Pri\u{00E9}re"));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for label in [
            "Prayers: Long-Life / Dedication!",
            "སྨོན་ལམ། (Aspirations)",
            "Pri\u{0065}\u{0301}re",
            "  --__  ",
            "",
            "!!!",
        ] {
            let once = sanitize_label(label);
            assert_eq!(sanitize_label(&once), once, "label {:?}", label);
        }
    }

    #[test]
    fn test_unique_path_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prayer.epub");
        assert_eq!(unique_path(&path), path);

        fs::write(&path, b"1").unwrap();
        assert_eq!(unique_path(&path), dir.path().join("prayer (1).epub"));

        fs::write(dir.path().join("prayer (1).epub"), b"2").unwrap();
        assert_eq!(unique_path(&path), dir.path().join("prayer (2).epub"));
    }

    #[test]
    fn test_plan_dedups_folders() {
        let root = Path::new("/out");
        let plan = plan(
            root,
            &topics(&["Dedications", "Aspirations", "Dedications?"]),
            Some(LanguageDir::English),
        );
        assert_eq!(plan.primary, root.join("Dedications"));
        assert_eq!(plan.secondary, vec![root.join("Aspirations")]);
        assert_eq!(plan.language, Some(root.join("English")));
    }

    #[test]
    fn test_place_moves_once_and_copies_rest() {
        let root = tempfile::tempdir().unwrap();
        let downloaded = root.path().join("prayer.epub");
        fs::write(&downloaded, b"epub bytes").unwrap();

        let placer = Placer::new(root.path(), &NoopObserver);
        let final_path = placer.place(
            &downloaded,
            &topics(&["Dedications", "Aspirations", "Long Life"]),
            None,
        );

        assert_eq!(final_path, root.path().join("Dedications/prayer.epub"));
        assert!(!downloaded.exists());
        for folder in ["Dedications", "Aspirations", "Long Life"] {
            let copy = root.path().join(folder).join("prayer.epub");
            assert_eq!(fs::read(&copy).unwrap(), b"epub bytes");
        }
        assert!(!root.path().join("English").exists());
    }

    #[test]
    fn test_failed_copy_keeps_other_placements() {
        let root = tempfile::tempdir().unwrap();
        let downloaded = root.path().join("prayer.epub");
        fs::write(&downloaded, b"epub bytes").unwrap();
        // A plain file where a topic folder should go.
        fs::write(root.path().join("Aspirations"), b"not a folder").unwrap();

        let placer = Placer::new(root.path(), &NoopObserver);
        let final_path = placer.place(
            &downloaded,
            &topics(&["Dedications", "Aspirations", "Long Life"]),
            Some(LanguageDir::English),
        );

        assert_eq!(final_path, root.path().join("Dedications/prayer.epub"));
        assert_eq!(fs::read(&final_path).unwrap(), b"epub bytes");
        assert_eq!(
            fs::read(root.path().join("Long Life/prayer.epub")).unwrap(),
            b"epub bytes"
        );
        assert_eq!(
            fs::read(root.path().join("English/prayer.epub")).unwrap(),
            b"epub bytes"
        );
        assert_eq!(
            fs::read(root.path().join("Aspirations")).unwrap(),
            b"not a folder"
        );
    }

    #[test]
    fn test_place_adds_language_copy() {
        let root = tempfile::tempdir().unwrap();
        let downloaded = root.path().join("prayer.epub");
        fs::write(&downloaded, b"english only").unwrap();

        let placer = Placer::new(root.path(), &NoopObserver);
        placer.place(&downloaded, &topics(&["Aspirations"]), Some(LanguageDir::English));

        assert_eq!(
            fs::read(root.path().join("English/prayer.epub")).unwrap(),
            b"english only"
        );
        assert_eq!(
            fs::read(root.path().join("Aspirations/prayer.epub")).unwrap(),
            b"english only"
        );
    }

    #[test]
    fn test_collisions_never_overwrite() {
        let root = tempfile::tempdir().unwrap();
        let placer = Placer::new(root.path(), &NoopObserver);

        let first = root.path().join("prayer.epub");
        fs::write(&first, b"first").unwrap();
        let a = placer.place(&first, &topics(&["Aspirations"]), None);

        let second = root.path().join("prayer.epub");
        fs::write(&second, b"second").unwrap();
        let b = placer.place(&second, &topics(&["Aspirations"]), None);

        assert_eq!(a, root.path().join("Aspirations/prayer.epub"));
        assert_eq!(b, root.path().join("Aspirations/prayer (1).epub"));
        assert_eq!(fs::read(&a).unwrap(), b"first");
        assert_eq!(fs::read(&b).unwrap(), b"second");
    }

    #[test]
    fn test_failed_move_keeps_download() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("gone.epub");
        let placer = Placer::new(root.path(), &NoopObserver);

        let final_path = placer.place(&missing, &topics(&["Aspirations"]), None);
        assert_eq!(final_path, missing);
    }

    #[test]
    fn test_place_language_only() {
        let root = tempfile::tempdir().unwrap();
        let downloaded = root.path().join("prayer-bo.epub");
        fs::write(&downloaded, b"tibetan").unwrap();

        let placer = Placer::new(root.path(), &NoopObserver);
        let path = placer
            .place_language_only(&downloaded, LanguageDir::Tibetan)
            .unwrap();

        assert_eq!(path, root.path().join("Tibetan/prayer-bo.epub"));
        assert!(!downloaded.exists());
    }
}
