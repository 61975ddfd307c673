//! Candidate scoring for catalog matching.
//!
//! This module contains:
//! - String similarity metrics (LCS ratio by default)
//! - Per-candidate title/artist scoring against the acceptance threshold
//! - The first-acceptable-candidate selection policy

use clap::ValueEnum;
use serde::Deserialize;

use crate::catalog::CatalogTrack;
use crate::normalize::{normalize_artist, normalize_title};

// ============================================================================
// Score Thresholds
// ============================================================================

/// Both title and artist similarity must be strictly above this to accept.
pub const ACCEPT_THRESHOLD: f64 = 0.8;

// ============================================================================
// Similarity
// ============================================================================

/// String similarity metric used for title and artist comparison.
///
/// All metrics are case-insensitive, symmetric, bounded to [0, 1] and give
/// 1.0 for identical strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SimilarityMetric {
    /// 2 * longest common subsequence / total length
    #[default]
    Lcs,
    /// 1 - edit distance / longest length
    Levenshtein,
}

/// Length of the longest common subsequence of two char slices.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    // Keep the shorter slice as the DP row
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];

    for &lc in long {
        for (j, &sc) in short.iter().enumerate() {
            curr[j + 1] = if lc == sc {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// Ratio of matched characters to total length across both strings (0.0 to 1.0).
pub fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    (2 * lcs_len(&a, &b)) as f64 / total as f64
}

/// Compute similarity between two strings with the given metric.
pub fn similarity(a: &str, b: &str, metric: SimilarityMetric) -> f64 {
    match metric {
        SimilarityMetric::Lcs => lcs_ratio(a, b),
        SimilarityMetric::Levenshtein => {
            strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
        }
    }
}

// ============================================================================
// Candidate Scoring
// ============================================================================

/// How candidates are compared and accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub threshold: f64,
    pub metric: SimilarityMetric,
    /// Normalize titles/artists (version suffixes, ASCII folding) before comparing
    pub lenient: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: ACCEPT_THRESHOLD,
            metric: SimilarityMetric::Lcs,
            lenient: false,
        }
    }
}

impl MatchPolicy {
    fn title_similarity(&self, local: &str, remote: &str) -> f64 {
        if self.lenient {
            similarity(&normalize_title(local), &normalize_title(remote), self.metric)
        } else {
            similarity(local, remote, self.metric)
        }
    }

    fn artist_similarity(&self, local: &str, remote: &str) -> f64 {
        if self.lenient {
            similarity(&normalize_artist(local), &normalize_artist(remote), self.metric)
        } else {
            similarity(local, remote, self.metric)
        }
    }
}

/// Title/artist similarity of one catalog candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateScore {
    pub title_similarity: f64,
    pub artist_similarity: f64,
    pub accepted: bool,
}

impl CandidateScore {
    /// Arithmetic mean of the two similarities.
    pub fn confidence(&self) -> f64 {
        (self.title_similarity + self.artist_similarity) / 2.0
    }
}

/// Score a candidate against the local title and artist.
pub fn score_candidate(
    title: &str,
    artist: &str,
    candidate: &CatalogTrack,
    policy: &MatchPolicy,
) -> CandidateScore {
    let title_similarity = policy.title_similarity(title, &candidate.title);
    let artist_similarity = policy.artist_similarity(artist, &candidate.primary_artist_name);
    CandidateScore {
        title_similarity,
        artist_similarity,
        accepted: title_similarity > policy.threshold && artist_similarity > policy.threshold,
    }
}

/// First candidate, in catalog order, whose title and artist both clear the threshold.
///
/// Later candidates are never considered once one is accepted, even if they
/// would score higher.
pub fn first_acceptable(
    title: &str,
    artist: &str,
    candidates: &[CatalogTrack],
    policy: &MatchPolicy,
) -> Option<(usize, CandidateScore)> {
    candidates.iter().enumerate().find_map(|(idx, candidate)| {
        let score = score_candidate(title, artist, candidate, policy);
        tracing::debug!(
            candidate = idx,
            title = %candidate.title,
            artist = %candidate.primary_artist_name,
            title_similarity = score.title_similarity,
            artist_similarity = score.artist_similarity,
            accepted = score.accepted,
            "Scored catalog candidate"
        );
        score.accepted.then_some((idx, score))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(title: &str, artist: &str) -> CatalogTrack {
        CatalogTrack {
            title: title.to_string(),
            primary_artist_name: artist.to_string(),
            album_id: "A1".to_string(),
        }
    }

    #[test]
    fn test_lcs_ratio_identity() {
        for s in ["a", "Hey Jude", "The Beatles", "Björk"] {
            assert_eq!(lcs_ratio(s, s), 1.0);
        }
    }

    #[test]
    fn test_similarity_symmetric() {
        let pairs = [
            ("Hey Jude", "Hey Jude (Remastered)"),
            ("abc", "xyz"),
            ("The Beatles", "Beatles"),
            ("kitten", "sitting"),
        ];
        for metric in [SimilarityMetric::Lcs, SimilarityMetric::Levenshtein] {
            for (a, b) in pairs {
                assert_eq!(similarity(a, b, metric), similarity(b, a, metric));
                let s = similarity(a, b, metric);
                assert!((0.0..=1.0).contains(&s));
            }
            assert_eq!(similarity("Yesterday", "Yesterday", metric), 1.0);
        }
    }

    #[test]
    fn test_lcs_ratio_case_insensitive() {
        assert_eq!(lcs_ratio("HEY JUDE", "hey jude"), 1.0);
    }

    #[test]
    fn test_lcs_ratio_values() {
        assert_eq!(lcs_ratio("abcde", "abcdx"), 0.8);
        assert_eq!(lcs_ratio("abc", "xyz"), 0.0);
        assert_eq!(lcs_ratio("", ""), 1.0);
        assert_eq!(lcs_ratio("abc", ""), 0.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        // Both similarities exactly 0.8
        let policy = MatchPolicy::default();
        let score = score_candidate("abcde", "vwxyz", &candidate("abcdx", "vwxya"), &policy);
        assert_eq!(score.title_similarity, 0.8);
        assert_eq!(score.artist_similarity, 0.8);
        assert!(!score.accepted);
    }

    #[test]
    fn test_first_acceptable_skips_earlier_misses() {
        let policy = MatchPolicy::default();
        let candidates = vec![
            candidate("Hey Jude", "Wilson Pickett & Friends Tribute"),
            candidate("Hey Jude", "The Beatles"),
        ];
        let (idx, score) = first_acceptable("Hey Jude", "The Beatles", &candidates, &policy)
            .expect("second candidate should match");
        assert_eq!(idx, 1);
        assert_eq!(score.confidence(), 1.0);
    }

    #[test]
    fn test_first_acceptable_is_not_best_of_n() {
        let policy = MatchPolicy::default();
        let candidates = vec![
            candidate("Hey Jude!", "The Beatles"),
            candidate("Hey Jude", "The Beatles"),
        ];
        let (idx, score) =
            first_acceptable("Hey Jude", "The Beatles", &candidates, &policy).unwrap();
        assert_eq!(idx, 0);
        assert!(score.confidence() < 1.0);
    }

    #[test]
    fn test_first_acceptable_none() {
        let policy = MatchPolicy::default();
        let candidates = vec![candidate("Something Else", "Someone Else")];
        assert!(first_acceptable("Hey Jude", "The Beatles", &candidates, &policy).is_none());
        assert!(first_acceptable("Hey Jude", "The Beatles", &[], &policy).is_none());
    }

    #[test]
    fn test_lenient_policy_ignores_version_suffix() {
        let strict = MatchPolicy::default();
        let lenient = MatchPolicy {
            lenient: true,
            ..MatchPolicy::default()
        };
        let remote = candidate("Hey Jude - Remastered 2015", "Beatles");
        assert!(!score_candidate("Hey Jude", "The Beatles", &remote, &strict).accepted);
        assert!(score_candidate("Hey Jude", "The Beatles", &remote, &lenient).accepted);
    }
}
