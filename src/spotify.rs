//! Spotify Web API catalog client.
//!
//! Uses the client-credentials flow: an app token is fetched on first use and
//! cached until shortly before it expires. Only track search and album lookup
//! are needed.

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::catalog::{CatalogAlbum, CatalogSearch, CatalogTrack, ReleaseDatePrecision};
use crate::error::CatalogError;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE_URL: &str = "https://api.spotify.com/v1";
const USER_AGENT: &str = concat!("library-enrich/", env!("CARGO_PKG_VERSION"));

/// Refresh the token this long before Spotify says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl SpotifyCredentials {
    /// Credentials when both parts are present and non-empty.
    pub fn from_parts(client_id: Option<String>, client_secret: Option<String>) -> Option<Self> {
        match (client_id, client_secret) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                Some(Self {
                    client_id: id,
                    client_secret: secret,
                })
            }
            _ => None,
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    artists: Vec<SpotifyArtist>,
    album: SpotifyAlbumRef,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbumRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: String,
    #[serde(default)]
    release_date: String,
    #[serde(default)]
    release_date_precision: String,
}

impl From<SpotifyTrack> for CatalogTrack {
    fn from(track: SpotifyTrack) -> Self {
        CatalogTrack {
            title: track.name,
            primary_artist_name: track
                .artists
                .into_iter()
                .next()
                .map(|a| a.name)
                .unwrap_or_default(),
            album_id: track.album.id,
        }
    }
}

impl From<SpotifyAlbum> for CatalogAlbum {
    fn from(album: SpotifyAlbum) -> Self {
        CatalogAlbum {
            name: album.name,
            release_date: album.release_date,
            release_date_precision: ReleaseDatePrecision::parse(&album.release_date_precision),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct SpotifyClient {
    http: Client,
    credentials: Option<SpotifyCredentials>,
    timeout: Duration,
    token: Mutex<Option<(String, Instant)>>,
}

impl SpotifyClient {
    pub fn new(credentials: Option<SpotifyCredentials>, timeout: Duration) -> Result<Self, CatalogError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http,
            credentials,
            timeout,
            token: Mutex::new(None),
        })
    }

    fn send_error(&self, e: reqwest::Error) -> CatalogError {
        if e.is_timeout() {
            CatalogError::Timeout(self.timeout)
        } else {
            CatalogError::Network(e.to_string())
        }
    }

    /// Cached app token, fetching a new one when missing or about to expire.
    fn access_token(&self) -> Result<String, CatalogError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(CatalogError::MissingCredentials)?;

        let mut cached = self
            .token
            .lock()
            .map_err(|_| CatalogError::Network("Token cache poisoned".into()))?;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        tracing::debug!("Requesting Spotify access token");
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .map_err(|e| self.send_error(e))?;
        let token: TokenResponse = decode(check_status(response)?)?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
        Ok(token.access_token)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T, CatalogError> {
        let token = self.access_token()?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .map_err(|e| self.send_error(e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // Token revoked or expired early; next call fetches a fresh one
            if let Ok(mut cached) = self.token.lock() {
                *cached = None;
            }
        }
        decode(check_status(response)?)
    }
}

fn check_status(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(CatalogError::RateLimited);
    }
    if !status.is_success() {
        let message = response.text().unwrap_or_default();
        return Err(CatalogError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CatalogError> {
    response.json().map_err(|e| CatalogError::Decode(e.to_string()))
}

impl CatalogSearch for SpotifyClient {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogTrack>, CatalogError> {
        let limit = limit.to_string();
        let url = format!("{}/search", API_BASE_URL);
        tracing::debug!(query, "Searching Spotify");
        let page: SearchResponse = self.get_json(
            &url,
            &[("q", query), ("type", "track"), ("limit", limit.as_str())],
        )?;
        Ok(page.tracks.items.into_iter().map(CatalogTrack::from).collect())
    }

    fn get_album(&self, album_id: &str) -> Result<CatalogAlbum, CatalogError> {
        let url = format!("{}/albums/{}", API_BASE_URL, album_id);
        let album: SpotifyAlbum = self.get_json(&url, &[])?;
        Ok(album.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_require_both_parts() {
        assert!(SpotifyCredentials::from_parts(Some("id".into()), Some("secret".into())).is_some());
        assert!(SpotifyCredentials::from_parts(Some("id".into()), None).is_none());
        assert!(SpotifyCredentials::from_parts(Some("id".into()), Some("  ".into())).is_none());
        assert!(SpotifyCredentials::from_parts(None, None).is_none());
    }

    #[test]
    fn test_missing_credentials_fail_without_network() {
        let client = SpotifyClient::new(None, Duration::from_secs(1)).unwrap();
        let err = client.search("track:Hey Jude artist:The Beatles", 10).unwrap_err();
        assert!(matches!(err, CatalogError::MissingCredentials));
    }

    #[test]
    fn test_search_response_mapping() {
        let json = r#"{"tracks":{"items":[
            {"name":"Hey Jude","artists":[{"name":"The Beatles"},{"name":"Other"}],"album":{"id":"0ETFjACtuP2ADo6LFhL6HN"}},
            {"name":"Orphan","artists":[],"album":{"id":"X"}}
        ]}}"#;
        let page: SearchResponse = serde_json::from_str(json).unwrap();
        let tracks: Vec<CatalogTrack> = page.tracks.items.into_iter().map(CatalogTrack::from).collect();
        assert_eq!(tracks[0].primary_artist_name, "The Beatles");
        assert_eq!(tracks[0].album_id, "0ETFjACtuP2ADo6LFhL6HN");
        assert_eq!(tracks[1].primary_artist_name, "");
    }

    #[test]
    fn test_album_response_mapping() {
        let json = r#"{"name":"Hey Jude","release_date":"1968-08-26","release_date_precision":"day"}"#;
        let album: CatalogAlbum = serde_json::from_str::<SpotifyAlbum>(json).unwrap().into();
        assert_eq!(album.release_year(), Some("1968"));
        assert_eq!(album.release_date_precision, ReleaseDatePrecision::Day);
    }
}
