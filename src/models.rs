//! Core data models for library enrichment.
//!
//! This module contains the parsed track record, the enrichment result and the
//! persisted row shape, plus the per-run statistics.

use serde::Serialize;
use std::fmt;

use crate::error::CatalogErrorKind;

/// Sentinel written to `Year` / `Genre` when nothing could be inferred.
pub const UNKNOWN: &str = "unknown";

// ============================================================================
// Parsed Records
// ============================================================================

/// A typed property-list value. A null value is modelled as an absent field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Integer(_) => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            FieldValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Integer(_) => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(i) => write!(f, "{}", i),
        }
    }
}

/// One track entry from the library export.
///
/// The fields the matcher reads are typed; every other key is carried through
/// `extra` in document order so an export round-trips it untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackRecord {
    /// 0-based index of the entry in the source document
    pub position: usize,
    pub track_id: Option<i64>,
    pub name: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<FieldValue>,
    pub extra: Vec<(String, FieldValue)>,
    pub enrichment: Option<EnrichmentResult>,
}

pub const KEY_TRACK_ID: &str = "Track ID";
pub const KEY_NAME: &str = "Name";
pub const KEY_ARTIST: &str = "Artist";
pub const KEY_ALBUM: &str = "Album";
pub const KEY_GENRE: &str = "Genre";
pub const KEY_YEAR: &str = "Year";

impl TrackRecord {
    pub fn new(position: usize) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Stable identifier: the library's Track ID, or the document position.
    /// Title + artist is never used since those collide.
    pub fn key(&self) -> String {
        match self.track_id {
            Some(id) => id.to_string(),
            None => format!("#{}", self.position),
        }
    }

    /// Store a field by its library key name.
    pub fn set_field(&mut self, key: &str, value: FieldValue) {
        match key {
            KEY_TRACK_ID => match value.as_integer() {
                Some(id) => self.track_id = Some(id),
                None => self.extra.push((key.to_string(), value)),
            },
            KEY_NAME => self.name = Some(value.to_string()),
            KEY_ARTIST => self.artist = Some(value.to_string()),
            KEY_ALBUM => self.album = Some(value.to_string()),
            KEY_GENRE => self.genre = Some(value.to_string()),
            KEY_YEAR => self.year = Some(value),
            _ => self.extra.push((key.to_string(), value)),
        }
    }

    /// Look up a field by its library key name.
    pub fn field(&self, key: &str) -> Option<FieldValue> {
        match key {
            KEY_TRACK_ID => self.track_id.map(FieldValue::Integer),
            KEY_NAME => self.name.clone().map(FieldValue::Text),
            KEY_ARTIST => self.artist.clone().map(FieldValue::Text),
            KEY_ALBUM => self.album.clone().map(FieldValue::Text),
            KEY_GENRE => self.genre.clone().map(FieldValue::Text),
            KEY_YEAR => self.year.clone(),
            _ => self
                .extra
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
        }
    }

    pub fn has_year(&self) -> bool {
        self.year.as_ref().is_some_and(|y| !y.is_blank())
    }

    /// Year as an integer, when it is one (the "unknown" sentinel is not).
    pub fn year_number(&self) -> Option<i32> {
        self.year
            .as_ref()
            .and_then(|y| y.as_integer())
            .and_then(|y| i32::try_from(y).ok())
    }

    /// Title and artist, both present and non-empty.
    pub fn identity(&self) -> Option<(&str, &str)> {
        let name = self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let artist = self
            .artist
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        Some((name, artist))
    }

    pub fn display_label(&self) -> String {
        format!(
            "'{}' by {}",
            self.name.as_deref().unwrap_or("?"),
            self.artist.as_deref().unwrap_or("?")
        )
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// Outcome of a catalog lookup for one record.
///
/// `confidence == 0.0` iff no match was accepted, in which case `inferred_year`
/// is the `unknown` sentinel and the matched fields are empty.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnrichmentResult {
    pub inferred_year: String,
    pub confidence: f64,
    pub matched_title: Option<String>,
    pub matched_artist: Option<String>,
    pub matched_album: Option<String>,
}

impl EnrichmentResult {
    pub fn unknown() -> Self {
        Self {
            inferred_year: UNKNOWN.to_string(),
            confidence: 0.0,
            matched_title: None,
            matched_artist: None,
            matched_album: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.confidence > 0.0
    }
}

/// What happened to a record when the enricher looked at it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnrichOutcome {
    /// Record already had a year, no lookup made
    AlreadyDated,
    /// A candidate was accepted
    Matched,
    /// The catalog answered but nothing cleared the threshold
    NoMatch,
    /// No catalog configured, or the record lacks title/artist
    Unavailable,
    /// The catalog failed (network, rate limit, timeout, ...)
    ServiceError(CatalogErrorKind),
}

impl EnrichOutcome {
    /// Degraded records ended with confidence 0 after needing a year.
    pub fn is_degraded(self) -> bool {
        matches!(
            self,
            EnrichOutcome::NoMatch | EnrichOutcome::Unavailable | EnrichOutcome::ServiceError(_)
        )
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Row in the tracks table, one per record.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PersistedTrack {
    pub id: Option<i64>,
    pub record_key: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub confidence: Option<f64>,
    pub matched_title: Option<String>,
    pub matched_artist: Option<String>,
    pub matched_album: Option<String>,
}

impl From<&TrackRecord> for PersistedTrack {
    fn from(record: &TrackRecord) -> Self {
        let enrichment = record.enrichment.as_ref();
        PersistedTrack {
            id: None,
            record_key: record.key(),
            title: record.name.clone(),
            artist: record.artist.clone(),
            album: record.album.clone(),
            year: record.year_number(),
            genre: record.genre.clone(),
            confidence: enrichment.map(|e| e.confidence),
            matched_title: enrichment.and_then(|e| e.matched_title.clone()),
            matched_artist: enrichment.and_then(|e| e.matched_artist.clone()),
            matched_album: enrichment.and_then(|e| e.matched_album.clone()),
        }
    }
}

impl PersistedTrack {
    /// Rebuild a minimal record for re-enrichment of a stored row.
    pub fn to_record(&self) -> TrackRecord {
        // Position-keyed rows are stored as "#<position>"
        let position = self
            .record_key
            .strip_prefix('#')
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        TrackRecord {
            position,
            track_id: self.record_key.parse().ok(),
            name: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            genre: self.genre.clone(),
            year: self.year.map(|y| FieldValue::Integer(y as i64)),
            extra: Vec::new(),
            enrichment: None,
        }
    }

    /// Copy an enrichment onto the row, keeping the stored key and id.
    pub fn apply(&mut self, record: &TrackRecord) {
        let updated = PersistedTrack::from(record);
        self.year = updated.year;
        self.genre = updated.genre;
        self.confidence = updated.confidence;
        self.matched_title = updated.matched_title;
        self.matched_artist = updated.matched_artist;
        self.matched_album = updated.matched_album;
    }
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Per-run counters, written as JSON with `--stats`.
#[derive(Default, Debug, Clone, Serialize)]
pub struct BatchStats {
    // Parsing
    pub parsed_records: usize,
    pub parse_failures: usize,
    pub parse_warnings: usize,

    // Enrichment
    pub already_dated: usize,
    pub matched: usize,
    pub no_match: usize,
    pub unavailable: usize,
    pub service_errors: usize,
    pub rate_limited: usize,
    pub timeouts: usize,

    // Persistence
    pub persisted: usize,
    pub skipped_cancelled: usize,

    pub elapsed_seconds: f64,
}

impl BatchStats {
    pub fn record(&mut self, outcome: EnrichOutcome) {
        match outcome {
            EnrichOutcome::AlreadyDated => self.already_dated += 1,
            EnrichOutcome::Matched => self.matched += 1,
            EnrichOutcome::NoMatch => self.no_match += 1,
            EnrichOutcome::Unavailable => self.unavailable += 1,
            EnrichOutcome::ServiceError(kind) => {
                self.service_errors += 1;
                match kind {
                    CatalogErrorKind::RateLimited => self.rate_limited += 1,
                    CatalogErrorKind::Timeout => self.timeouts += 1,
                    _ => {}
                }
            }
        }
    }

    pub fn degraded(&self) -> usize {
        self.no_match + self.unavailable + self.service_errors
    }

    /// Matched records as a percentage of those that needed a year.
    pub fn match_rate(&self) -> f64 {
        let attempted = self.matched + self.degraded();
        if attempted == 0 {
            0.0
        } else {
            100.0 * self.matched as f64 / attempted as f64
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
