//! Configuration resolution.
//!
//! Settings come from the command line (with environment fallbacks for the
//! catalog credentials) and an optional TOML file. A value given explicitly on
//! the command line wins, the file fills in the rest, and built-in defaults
//! cover whatever neither sets.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::enrich::EnricherConfig;
use crate::scoring::SimilarityMetric;
use crate::spotify::SpotifyCredentials;

/// Spotify caps search results per page at 50.
const MAX_RESULT_LIMIT: usize = 50;

pub const DEFAULT_DB_PATH: &str = "tracks.sqlite3";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<String>,
    pub workers: Option<usize>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    #[serde(default)]
    pub enrich: EnrichFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichFileConfig {
    pub result_limit: Option<usize>,
    pub accept_threshold: Option<f64>,
    pub request_timeout_secs: Option<u64>,
    pub metric: Option<SimilarityMetric>,
    pub lenient: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// CLI-provided values that take part in resolution. `None` means the flag was
/// not given.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub workers: Option<usize>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub metric: Option<SimilarityMetric>,
    pub lenient: Option<bool>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub workers: usize,
    pub credentials: Option<SpotifyCredentials>,
    pub enricher: EnricherConfig,
}

impl AppConfig {
    /// Merge CLI values with an optional file config and validate the result.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = cli
            .db_path
            .clone()
            .or_else(|| file.db_path.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let workers = cli.workers.or(file.workers).unwrap_or(0);

        let credentials = SpotifyCredentials::from_parts(
            cli.spotify_client_id.clone().or(file.spotify_client_id),
            cli.spotify_client_secret.clone().or(file.spotify_client_secret),
        );

        let defaults = EnricherConfig::default();
        let enrich = file.enrich;
        let enricher = EnricherConfig {
            result_limit: enrich.result_limit.unwrap_or(defaults.result_limit),
            accept_threshold: enrich.accept_threshold.unwrap_or(defaults.accept_threshold),
            request_timeout: cli
                .request_timeout_secs
                .or(enrich.request_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            metric: cli.metric.or(enrich.metric).unwrap_or(defaults.metric),
            lenient: cli.lenient.or(enrich.lenient).unwrap_or(defaults.lenient),
        };

        if enricher.result_limit == 0 || enricher.result_limit > MAX_RESULT_LIMIT {
            bail!(
                "result_limit must be between 1 and {}, got {}",
                MAX_RESULT_LIMIT,
                enricher.result_limit
            );
        }
        if !(0.0..=1.0).contains(&enricher.accept_threshold) {
            bail!(
                "accept_threshold must be within [0, 1], got {}",
                enricher.accept_threshold
            );
        }
        if enricher.request_timeout.is_zero() {
            bail!("request_timeout_secs must be positive");
        }

        Ok(Self {
            db_path,
            workers,
            credentials,
            enricher,
        })
    }
}
