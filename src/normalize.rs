//! Lenient normalization applied before similarity scoring.
//!
//! Off by default: the matcher compares lowercase text as-is. With `lenient = true`
//! titles lose version suffixes ("- Remastered 2009", "(Live)") and both sides are
//! folded to ASCII, which helps libraries ripped from reissues.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Version suffixes stripped from titles (applied in order).
pub static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Remaster variants: "- Remastered 2009", "(2011 Remaster)"
        Regex::new(r"(?i)\s*[-–—/]\s*(?:remaster(?:ed)?(?:\s+\d{4})?|(?:\d{4}\s+)?(?:digital\s+)?remaster(?:ed)?)").unwrap(),
        Regex::new(r"(?i)\s*[\(\[](?:remaster(?:ed)?(?:\s+\d{4})?|(?:\d{4}\s+)?remaster(?:ed)?)[\)\]]").unwrap(),
        // Live/acoustic: "(Live at Wembley)", "- Acoustic Version"
        Regex::new(r"(?i)\s*[\(\[](?:live(?:\s+(?:at|from|in)\s+[^)\]]+)?|acoustic(?:\s+version)?|unplugged)[\)\]]").unwrap(),
        Regex::new(r"(?i)\s*[-–—]\s*(?:live(?:\s+(?:at|from|in)\s+.+)?|acoustic(?:\s+version)?)$").unwrap(),
        // Edition and mix variants: "(Deluxe Edition)", "[Radio Edit]", "(Mono)"
        Regex::new(r"(?i)\s*[\(\[](?:deluxe|expanded|anniversary|bonus\s+track|radio\s+edit|single\s+version|album\s+version|mono|stereo)(?:\s+edition)?[\)\]]").unwrap(),
        // Single/LP version with dash: "- Single Version"
        Regex::new(r"(?i)\s*[-–—]\s*(?:single|lp|mono|stereo)(?:\s+version)?\s*$").unwrap(),
        // Featured artists: "(feat. Artist)", "ft. Someone"
        Regex::new(r"(?i)\s*[\(\[](?:feat\.?|ft\.?|featuring)\s+[^)\]]+[\)\]]").unwrap(),
        Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+.+$").unwrap(),
        // Year suffix: "- 2021", "(1964)"
        Regex::new(r"(?i)\s*[-–—]\s*\d{4}(?:\s+(?:version|mix|edit))?$").unwrap(),
        Regex::new(r"\s*\(\d{4}\)\s*$").unwrap(),
    ]
});

/// Featured-artist tails stripped from artist names.
pub static FEATURED_ARTIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+.*").unwrap());

/// Regex to collapse multiple whitespace into single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

// ============================================================================
// UNICODE & PUNCTUATION
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII: NFKD, drop combining marks, transliterate.
/// e.g., "Beyoncé" → "beyonce", "Motörhead" → "motorhead"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// Straighten curly quotes, spell out " & " and collapse runs of whitespace.
pub fn normalize_punctuation(s: &str) -> String {
    let result = s
        .replace(['\u{2018}', '\u{2019}', '\u{00B4}', '\u{0060}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(" & ", " and ");
    MULTI_SPACE.replace_all(&result, " ").to_string()
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Normalize a title for lenient matching.
pub fn normalize_title(title: &str) -> String {
    let mut result = normalize_punctuation(title);
    for pattern in VERSION_PATTERNS.iter() {
        result = pattern.replace_all(&result, "").to_string();
    }
    let folded = fold_to_ascii(&result).trim().to_string();
    // Never normalize a title away entirely ("(Live)" alone, "1999 - 2000")
    if folded.is_empty() {
        fold_to_ascii(title).trim().to_string()
    } else {
        folded
    }
}

/// Normalize an artist name for lenient matching.
/// Strips featured artists and a leading/trailing "the".
pub fn normalize_artist(artist: &str) -> String {
    let result = normalize_punctuation(artist);
    let result = FEATURED_ARTIST.replace_all(&result, "");
    let mut normalized = fold_to_ascii(&result).trim().to_string();

    if normalized.starts_with("the ") && normalized.len() > 4 {
        normalized = normalized[4..].to_string();
    }
    if normalized.ends_with(", the") {
        normalized.truncate(normalized.len() - 5);
    }
    normalized
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title_strips_versions() {
        assert_eq!(normalize_title("Hey Jude - Remastered 2015"), "hey jude");
        assert_eq!(normalize_title("Let It Be (2009 Remaster)"), "let it be");
        assert_eq!(normalize_title("Song (Live at Wembley)"), "song");
        assert_eq!(normalize_title("Track [Radio Edit]"), "track");
        assert_eq!(normalize_title("Hit - Single Version"), "hit");
        assert_eq!(normalize_title("Tune (feat. Someone)"), "tune");
    }

    #[test]
    fn test_normalize_title_never_empties() {
        assert_eq!(normalize_title("(Live)"), "(live)");
    }

    #[test]
    fn test_normalize_artist_basic() {
        assert_eq!(normalize_artist("The Beatles"), "beatles");
        assert_eq!(normalize_artist("Band, The"), "band");
        assert_eq!(normalize_artist("Artist feat. Other"), "artist");
        assert_eq!(normalize_artist("Simon & Garfunkel"), "simon and garfunkel");
    }

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Björk"), "bjork");
        assert_eq!(fold_to_ascii("Motörhead"), "motorhead");
        assert_eq!(fold_to_ascii("Beyoncé"), "beyonce");
    }

    #[test]
    fn test_normalize_punctuation() {
        assert_eq!(normalize_punctuation("Don\u{2019}t Stop"), "Don't Stop");
        assert_eq!(normalize_punctuation("Rock & Roll"), "Rock and Roll");
        assert_eq!(normalize_punctuation("Peter  Gabriel"), "Peter Gabriel");
    }
}
