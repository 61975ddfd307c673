//! Music-catalog collaborator seam.
//!
//! The enricher only talks to a `CatalogSearch`. `SpotifyClient` is the concrete
//! implementation; tests inject scripted catalogs. `TimedCatalog` bounds every call.

use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CatalogError;

/// One search hit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogTrack {
    pub title: String,
    pub primary_artist_name: String,
    pub album_id: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReleaseDatePrecision {
    #[default]
    Year,
    Month,
    Day,
}

impl ReleaseDatePrecision {
    pub fn parse(s: &str) -> Self {
        match s {
            "day" => ReleaseDatePrecision::Day,
            "month" => ReleaseDatePrecision::Month,
            _ => ReleaseDatePrecision::Year,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogAlbum {
    pub name: String,
    /// "YYYY", "YYYY-MM" or "YYYY-MM-DD" depending on precision
    pub release_date: String,
    pub release_date_precision: ReleaseDatePrecision,
}

impl CatalogAlbum {
    /// Release year, when the date starts with four ASCII digits.
    pub fn release_year(&self) -> Option<&str> {
        let year = self.release_date.get(..4)?;
        year.bytes().all(|b| b.is_ascii_digit()).then_some(year)
    }
}

/// Search and album lookup against a music catalog.
pub trait CatalogSearch: Send + Sync {
    /// Tracks matching a free-text query, in catalog relevance order.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogTrack>, CatalogError>;

    fn get_album(&self, album_id: &str) -> Result<CatalogAlbum, CatalogError>;
}

// ============================================================================
// Timeout wrapper
// ============================================================================

/// Bounds each call on the inner catalog with a deadline.
///
/// The call runs on a helper thread; on timeout the caller gets
/// `CatalogError::Timeout` and the helper's late answer is discarded.
pub struct TimedCatalog {
    inner: Arc<dyn CatalogSearch>,
    timeout: Duration,
}

impl TimedCatalog {
    pub fn new(inner: Arc<dyn CatalogSearch>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn call<T, F>(&self, f: F) -> Result<T, CatalogError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CatalogSearch) -> Result<T, CatalogError> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name("catalog-call".into())
            .spawn(move || {
                // Receiver may be gone after a timeout
                let _ = tx.send(f(inner.as_ref()));
            })
            .map_err(|e| CatalogError::Network(format!("Failed spawning catalog call: {}", e)))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CatalogError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(CatalogError::Network(
                "Catalog call ended without a response".into(),
            )),
        }
    }
}

impl CatalogSearch for TimedCatalog {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogTrack>, CatalogError> {
        let query = query.to_string();
        self.call(move |catalog| catalog.search(&query, limit))
    }

    fn get_album(&self, album_id: &str) -> Result<CatalogAlbum, CatalogError> {
        let album_id = album_id.to_string();
        self.call(move |catalog| catalog.get_album(&album_id))
    }
}
