//! Release-year enrichment against a music catalog.
//!
//! For a record lacking a year the enricher searches the catalog for
//! `track:<title> artist:<artist>`, accepts the first candidate whose title and
//! artist both clear the threshold, and reads the year from that candidate's album.
//! Every failure along the way degrades the record to `unknown` with confidence 0.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::catalog::{CatalogSearch, TimedCatalog};
use crate::error::CatalogError;
use crate::models::{EnrichOutcome, EnrichmentResult, FieldValue, TrackRecord, UNKNOWN};
use crate::scoring::{first_acceptable, MatchPolicy, SimilarityMetric, ACCEPT_THRESHOLD};

/// Number of candidates requested per search.
pub const DEFAULT_RESULT_LIMIT: usize = 10;

/// Upper bound on a single catalog call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq)]
pub struct EnricherConfig {
    pub result_limit: usize,
    pub accept_threshold: f64,
    pub request_timeout: Duration,
    pub metric: SimilarityMetric,
    pub lenient: bool,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            result_limit: DEFAULT_RESULT_LIMIT,
            accept_threshold: ACCEPT_THRESHOLD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            metric: SimilarityMetric::default(),
            lenient: false,
        }
    }
}

impl EnricherConfig {
    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            threshold: self.accept_threshold,
            metric: self.metric,
            lenient: self.lenient,
        }
    }
}

/// Fills in missing years (and genres) on track records.
///
/// Safe to share across worker threads; the catalog collaborator is `Send + Sync`.
pub struct Enricher {
    catalog: Option<Arc<dyn CatalogSearch>>,
    config: EnricherConfig,
    policy: MatchPolicy,
}

impl Enricher {
    /// Build an enricher. With `catalog = None` every lookup is a no-op that
    /// yields `unknown`.
    pub fn new(catalog: Option<Arc<dyn CatalogSearch>>, config: EnricherConfig) -> Self {
        let timeout = config.request_timeout;
        let catalog = catalog.map(|inner| {
            Arc::new(TimedCatalog::new(inner, timeout)) as Arc<dyn CatalogSearch>
        });
        let policy = config.policy();
        Self {
            catalog,
            config,
            policy,
        }
    }

    pub fn has_catalog(&self) -> bool {
        self.catalog.is_some()
    }

    pub fn config(&self) -> &EnricherConfig {
        &self.config
    }

    /// Best-effort release year for one record. Never fails.
    pub fn infer_year(&self, record: &TrackRecord) -> EnrichmentResult {
        self.infer(record).0
    }

    /// Fill in a record's missing year and genre.
    ///
    /// A record that already carries a year is not looked up. Otherwise its
    /// year becomes the inferred year or `unknown`, and the lookup result is
    /// kept on the record.
    pub fn enrich(&self, record: &mut TrackRecord) -> EnrichOutcome {
        if record.genre.as_deref().map_or(true, |g| g.trim().is_empty()) {
            record.genre = Some(UNKNOWN.to_string());
        }

        if record.has_year() {
            return EnrichOutcome::AlreadyDated;
        }

        let (result, outcome) = self.infer(record);
        record.year = Some(match result.inferred_year.parse::<i64>() {
            Ok(year) => FieldValue::Integer(year),
            Err(_) => FieldValue::Text(result.inferred_year.clone()),
        });
        record.enrichment = Some(result);
        outcome
    }

    fn infer(&self, record: &TrackRecord) -> (EnrichmentResult, EnrichOutcome) {
        let Some((title, artist)) = record.identity() else {
            debug!(record = %record.key(), "Skipping lookup: title or artist missing");
            return (EnrichmentResult::unknown(), EnrichOutcome::Unavailable);
        };
        let Some(catalog) = self.catalog.as_deref() else {
            return (EnrichmentResult::unknown(), EnrichOutcome::Unavailable);
        };

        match self.lookup(catalog, title, artist) {
            Ok(Some(result)) => (result, EnrichOutcome::Matched),
            Ok(None) => (EnrichmentResult::unknown(), EnrichOutcome::NoMatch),
            Err(e) => {
                warn!(
                    record = %record.key(),
                    title,
                    artist,
                    kind = e.kind().as_str(),
                    "Catalog lookup failed: {}",
                    e
                );
                (EnrichmentResult::unknown(), EnrichOutcome::ServiceError(e.kind()))
            }
        }
    }

    /// `Ok(None)` means the catalog answered but nothing usable matched.
    fn lookup(
        &self,
        catalog: &dyn CatalogSearch,
        title: &str,
        artist: &str,
    ) -> Result<Option<EnrichmentResult>, CatalogError> {
        let query = format!("track:{} artist:{}", title, artist);
        let candidates = catalog.search(&query, self.config.result_limit)?;

        let Some((idx, score)) = first_acceptable(title, artist, &candidates, &self.policy) else {
            debug!(title, artist, candidates = candidates.len(), "No candidate above threshold");
            return Ok(None);
        };
        let candidate = &candidates[idx];

        let album = catalog.get_album(&candidate.album_id)?;
        let Some(year) = album.release_year() else {
            warn!(
                title,
                artist,
                album = %album.name,
                release_date = %album.release_date,
                "Accepted candidate has no usable release year"
            );
            return Ok(None);
        };

        Ok(Some(EnrichmentResult {
            inferred_year: year.to_string(),
            confidence: score.confidence(),
            matched_title: Some(candidate.title.clone()),
            matched_artist: Some(candidate.primary_artist_name.clone()),
            matched_album: Some(album.name.clone()),
        }))
    }
}
