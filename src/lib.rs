//! Library enrichment - parse a music-library export, fill in missing release
//! years from a catalog, and persist the tracks.

pub mod batch;
pub mod catalog;
pub mod config;
pub mod enrich;
pub mod error;
pub mod job;
pub mod models;
pub mod normalize;
pub mod plist;
pub mod progress;
pub mod safety;
pub mod scoring;
pub mod spotify;
pub mod store;
