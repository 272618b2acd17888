//! Deciding whether a document page is missing one of its two languages.

use std::fmt;

/// URL path segment of pages served in the source language.
pub const SOURCE_LANGUAGE_SEGMENT: &str = "/bo/";

/// Top-level folder receiving copies of monolingual documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageDir {
    English,
    Tibetan,
}

impl LanguageDir {
    pub fn folder_name(self) -> &'static str {
        match self {
            LanguageDir::English => "English",
            LanguageDir::Tibetan => "Tibetan",
        }
    }
}

impl fmt::Display for LanguageDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder_name())
    }
}

/// What was observed on the page currently displayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSignals {
    pub url: String,
    pub has_bo_class: bool,
    pub has_en_class: bool,
    pub has_en_trans_class: bool,
    /// Visible text of the main content region.
    pub main_text: String,
}

impl PageSignals {
    pub fn is_source_language_page(&self) -> bool {
        is_source_language_url(&self.url)
    }
}

pub fn is_source_language_url(url: &str) -> bool {
    url.contains(SOURCE_LANGUAGE_SEGMENT)
}

/// True for anything in the Tibetan block, U+0F00..=U+0FFF.
pub fn is_tibetan_char(c: char) -> bool {
    ('\u{0F00}'..='\u{0FFF}').contains(&c)
}

pub fn contains_tibetan(text: &str) -> bool {
    text.chars().any(is_tibetan_char)
}

/// Absence of evidence for the other language counts as a monolingual page,
/// so a bilingual page that has not finished rendering can be misread.
pub fn classify(signals: &PageSignals) -> Option<LanguageDir> {
    if !signals.is_source_language_page() {
        let has_tibetan = signals.has_bo_class || contains_tibetan(&signals.main_text);
        (!has_tibetan).then_some(LanguageDir::English)
    } else {
        let has_english = signals.has_en_class || signals.has_en_trans_class;
        (!has_english).then_some(LanguageDir::Tibetan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EN_URL: &str = "https://www.lotsawahouse.org/tibetan-masters/mipham/prayer";
    const BO_URL: &str = "https://www.lotsawahouse.org/bo/tibetan-masters/mipham/prayer";

    fn signals(url: &str) -> PageSignals {
        PageSignals {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_english_page_without_tibetan_is_english_only() {
        let page = PageSignals {
            has_en_class: true,
            main_text: "May all beings be happy.".into(),
            ..signals(EN_URL)
        };
        assert_eq!(classify(&page), Some(LanguageDir::English));
    }

    #[test]
    fn test_english_page_with_bo_class_is_bilingual() {
        let page = PageSignals {
            has_bo_class: true,
            has_en_class: true,
            ..signals(EN_URL)
        };
        assert_eq!(classify(&page), None);
    }

    #[test]
    fn test_tibetan_script_detected_without_classes() {
        let page = PageSignals {
            main_text: "ན་མོ་གུ་རུ། Homage to the guru.".into(),
            ..signals(EN_URL)
        };
        assert_eq!(classify(&page), None);
    }

    #[test]
    fn test_tibetan_page_without_english_is_tibetan_only() {
        let page = PageSignals {
            has_bo_class: true,
            main_text: "ན་མོ་གུ་རུ།".into(),
            ..signals(BO_URL)
        };
        assert_eq!(classify(&page), Some(LanguageDir::Tibetan));
    }

    #[test]
    fn test_tibetan_page_with_transliteration_is_bilingual() {
        let page = PageSignals {
            has_en_trans_class: true,
            ..signals(BO_URL)
        };
        assert_eq!(classify(&page), None);
    }

    #[test]
    fn test_tibetan_script_does_not_matter_on_source_page() {
        // Only the English classes count on the source-language page.
        let page = PageSignals {
            has_en_class: true,
            main_text: "ན་མོ།".into(),
            ..signals(BO_URL)
        };
        assert_eq!(classify(&page), None);
    }

    #[test]
    fn test_tibetan_block_bounds() {
        assert!(is_tibetan_char('\u{0F00}'));
        assert!(is_tibetan_char('\u{0FFF}'));
        assert!(!is_tibetan_char('\u{0EFF}'));
        assert!(!is_tibetan_char('\u{1000}'));
        assert!(!contains_tibetan("plain ascii"));
    }

    #[test]
    fn test_folder_names() {
        assert_eq!(LanguageDir::English.folder_name(), "English");
        assert_eq!(LanguageDir::Tibetan.to_string(), "Tibetan");
    }
}
